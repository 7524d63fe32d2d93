//! Types related to GraphQL errors.

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;
use crate::json_ext::Path;

/// Extension code of the error attached to fields of a cancelled request.
pub const EXECUTION_ABORTED: &str = "EXECUTION_ABORTED";

/// Extension code of the error produced when no resolver handled a subscription error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
/// The error location
pub struct Location {
    /// The line number
    pub line: u32,
    /// The column number
    pub column: u32,
}

/// A [GraphQL error](https://spec.graphql.org/October2021/#sec-Errors)
/// as may be attached to the outcome of a data fetcher.
///
/// Converted to (or from) JSON with serde.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error in the GraphQL document of the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub locations: Vec<Location>,

    /// If this is a field error, the JSON path to that field in the response data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// The optional GraphQL extensions for this error.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// Returns a builder that builds a GraphQL [`Error`] from its components.
    ///
    /// Builder methods:
    ///
    /// * `.message(impl Into<`[`String`]`>)`
    ///   Required.
    ///   Sets [`Error::message`].
    ///
    /// * `.locations(impl Into<`[`Vec`]`<`[`Location`]`>>)`
    ///   Optional.
    ///   Sets the entire `Vec` of [`Error::locations`], which defaults to the empty.
    ///
    /// * `.location(impl Into<`[`Location`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one item at the end of [`Error::locations`].
    ///
    /// * `.path(impl Into<`[`Path`]`>)`
    ///   Optional.
    ///   Sets [`Error::path`].
    ///
    /// * `.extension_code(impl Into<`[`String`]`>)`
    ///   Optional.
    ///   Sets the "code" in the extension map. Will be ignored if extension already has this key
    ///   set.
    ///
    /// * `.extensions(impl Into<`[`serde_json_bytes::Map`]`<`[`ByteString`]`, `[`Value`]`>>)`
    ///   Optional.
    ///   Sets the entire [`Error::extensions`] map, which defaults to empty.
    ///
    /// * `.extension(impl Into<`[`ByteString`]`>, impl Into<`[`Value`]`>)`
    ///   Optional, may be called multiple times.
    ///   Adds one item to the [`Error::extensions`] map.
    ///
    /// * `.build()`
    ///   Finishes the builder and returns a GraphQL [`Error`].
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        extension_code: Option<String>,
        // Skip the `Object` type alias in order to use buildstructor's map special-casing
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(ByteString::from(code)));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    /// The error raised into every field of a request the client has cancelled.
    pub fn cancelled_by_client() -> Error {
        Error::builder()
            .message("GraphQL request has been cancelled by the client.")
            .extension_code(EXECUTION_ABORTED)
            .build()
    }

    /// The error used when no subscription exception resolver could handle a failure.
    pub fn unresolved_subscription_error() -> Error {
        Error::builder()
            .message("Unresolved subscription error")
            .extension_code(INTERNAL_ERROR)
            .build()
    }

    /// The `code` extension, if any.
    pub fn extension_code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::json_ext::PathElement;

    #[test]
    fn builder_sets_code_once() {
        let error = Error::builder()
            .message("boom")
            .extension("code", "ALREADY_SET")
            .extension_code("IGNORED")
            .build();
        assert_eq!(error.extension_code(), Some("ALREADY_SET"));
    }

    #[test]
    fn serialization_skips_empty_parts() {
        let error = Error::builder().message("boom").build();
        assert_eq!(
            serde_json_bytes::to_value(&error).unwrap(),
            json!({ "message": "boom" })
        );

        let error = Error::builder()
            .message("boom")
            .location(Location { line: 1, column: 2 })
            .path(Path(vec![PathElement::from("ticks"), PathElement::from(0)]))
            .extension_code(INTERNAL_ERROR)
            .build();
        assert_eq!(
            serde_json_bytes::to_value(&error).unwrap(),
            json!({
                "message": "boom",
                "locations": [{ "line": 1, "column": 2 }],
                "path": ["ticks", 0],
                "extensions": { "code": "INTERNAL_ERROR" }
            })
        );
    }

    #[test]
    fn cancelled_error() {
        let error = Error::cancelled_by_client();
        assert_eq!(
            error.message,
            "GraphQL request has been cancelled by the client."
        );
        assert_eq!(error.extension_code(), Some(EXECUTION_ABORTED));
    }
}
