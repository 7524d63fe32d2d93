//! The data fetchers of a schema, by field.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::fetcher::DataFetcher;

/// Identifies a field: the name of its parent type and its own name.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldCoordinates {
    pub type_name: String,
    pub field_name: String,
}

impl FieldCoordinates {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// Data fetchers registered for the fields of a schema.
///
/// Fields without a registered data fetcher are resolved by the engine's default data fetcher.
#[derive(Clone, Default)]
pub struct CodeRegistry {
    fetchers: IndexMap<FieldCoordinates, Arc<dyn DataFetcher>>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `fetcher` for `type_name.field_name`, replacing any previous one.
    pub fn data_fetcher(
        &mut self,
        coordinates: FieldCoordinates,
        fetcher: impl DataFetcher,
    ) -> &mut Self {
        self.fetchers.insert(coordinates, Arc::new(fetcher));
        self
    }

    pub(crate) fn insert(&mut self, coordinates: FieldCoordinates, fetcher: Arc<dyn DataFetcher>) {
        self.fetchers.insert(coordinates, fetcher);
    }

    pub fn get(&self, coordinates: &FieldCoordinates) -> Option<&Arc<dyn DataFetcher>> {
        self.fetchers.get(coordinates)
    }

    pub fn contains(&self, coordinates: &FieldCoordinates) -> bool {
        self.fetchers.contains_key(coordinates)
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldCoordinates, &Arc<dyn DataFetcher>)> {
        self.fetchers.iter()
    }
}

impl fmt::Debug for CodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fetchers.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::Context;
    use crate::FetchEnvironment;
    use crate::FieldValue;
    use crate::fetcher::PropertyFetcher;
    use crate::fetcher::from_fn;

    #[test]
    fn coordinates_display() {
        assert_eq!(FieldCoordinates::new("Query", "books").to_string(), "Query.books");
    }

    #[test]
    fn registration_replaces_previous_fetcher() {
        let coordinates = FieldCoordinates::new("Query", "answer");
        let mut registry = CodeRegistry::new();
        registry
            .data_fetcher(coordinates.clone(), PropertyFetcher)
            .data_fetcher(coordinates.clone(), from_fn(|_| Ok(FieldValue::from(json!(42)))));
        assert_eq!(registry.len(), 1);

        let env = FetchEnvironment::new(Context::new(), coordinates.clone());
        let value = registry.get(&coordinates).unwrap().fetch(&env).unwrap();
        assert_eq!(value.into_value(), Some(json!(42)));
    }
}
