//! Configuration of context propagation.
//!
//! ```yaml
//! context_propagation:
//!   clear_missing: true
//!   capture_keys:
//!     - tenant
//!     - user
//! ```

use std::collections::HashSet;
use std::str::FromStr;

use schemars::JsonSchema;
use schemars::schema::RootSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigurationError;

/// The configuration of the data fetcher decoration.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// How thread-local state is propagated into data fetchers
    pub context_propagation: ContextPropagation,
}

/// Options of the [`ContextSnapshotFactory`](crate::ContextSnapshotFactory).
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ContextPropagation {
    /// Reset thread-local values that have no captured value while a data fetcher runs
    /// default: false
    pub clear_missing: bool,

    /// Only propagate the thread-local values registered under these keys
    /// default: all keys
    pub capture_keys: Option<Vec<String>>,
}

impl Configuration {
    /// Parse and validate configuration in YAML syntax.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration = serde_yaml::from_str(yaml)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(keys) = &self.context_propagation.capture_keys {
            let mut seen = HashSet::new();
            if let Some(key) = keys.iter().find(|key| !seen.insert(key.as_str())) {
                return Err(ConfigurationError::DuplicateCaptureKey { key: key.clone() });
            }
        }
        Ok(())
    }

    /// The JSON schema of the configuration, for editor support.
    pub fn json_schema() -> RootSchema {
        schemars::schema_for!(Configuration)
    }
}

/// Parse configuration from a string in YAML syntax
impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Configuration::from_yaml(s)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_configuration_uses_defaults() {
        let configuration = Configuration::from_yaml("{}").unwrap();
        assert_eq!(configuration, Configuration::default());
        assert!(!configuration.context_propagation.clear_missing);
        assert_eq!(configuration.context_propagation.capture_keys, None);
    }

    #[test]
    fn full_configuration() {
        let configuration: Configuration = r#"
context_propagation:
  clear_missing: true
  capture_keys:
    - tenant
    - user
"#
        .parse()
        .unwrap();
        assert_eq!(
            configuration.context_propagation,
            ContextPropagation {
                clear_missing: true,
                capture_keys: Some(vec!["tenant".to_string(), "user".to_string()]),
            }
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let error = Configuration::from_yaml(
            r#"
context_propagation:
  clear_mising: true
"#,
        )
        .unwrap_err();
        assert!(matches!(error, ConfigurationError::Yaml(_)));
        assert!(error.to_string().contains("clear_mising"));
    }

    #[test]
    fn duplicate_capture_keys_are_rejected() {
        let error = Configuration::from_yaml(
            r#"
context_propagation:
  capture_keys: [tenant, user, tenant]
"#,
        )
        .unwrap_err();
        assert_eq!(
            error.to_string(),
            "capture key 'tenant' is listed more than once"
        );
    }

    #[test]
    fn schema_lists_options() {
        let schema = serde_json::to_value(Configuration::json_schema()).unwrap();
        let properties = &schema["definitions"]["ContextPropagation"]["properties"];
        assert!(properties.get("clear_missing").is_some());
        assert!(properties.get("capture_keys").is_some());
        assert_eq!(
            schema["definitions"]["ContextPropagation"]["additionalProperties"],
            serde_json::json!(false)
        );
    }
}
