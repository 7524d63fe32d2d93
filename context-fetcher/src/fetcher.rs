//! Data fetchers and the values they return.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use tower::BoxError;

use crate::context::Context;
use crate::context::LocalContext;
use crate::graphql;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::registry::FieldCoordinates;

/// A value that becomes available later.
pub type ValueFuture = BoxFuture<'static, Result<Value, BoxError>>;

/// A stream of values that become available over time.
pub type ValueStream = BoxStream<'static, Result<Value, BoxError>>;

/// What a data fetcher returns for one field.
pub enum FieldValue {
    /// A plain value. [`Value::Null`] means the field has no value.
    Value(Value),
    /// A value paired with GraphQL errors and a local context for the child fields.
    Result(Box<FetcherResult>),
    /// A single value produced later.
    Future(ValueFuture),
    /// Values produced over time.
    Stream(ValueStream),
    /// Any other value, possibly an asynchronous type known to an
    /// [`AdapterRegistry`](crate::adapter::AdapterRegistry).
    Opaque(Box<dyn Any + Send>),
}

impl FieldValue {
    pub fn null() -> Self {
        FieldValue::Value(Value::Null)
    }

    pub fn future(future: ValueFuture) -> Self {
        FieldValue::Future(future)
    }

    pub fn stream(stream: ValueStream) -> Self {
        FieldValue::Stream(stream)
    }

    pub fn opaque<T: Any + Send>(value: T) -> Self {
        FieldValue::Opaque(Box::new(value))
    }

    pub fn result(result: FetcherResult) -> Self {
        FieldValue::Result(Box::new(result))
    }

    /// Whether the field has no value at all.
    pub fn is_absent(&self) -> bool {
        matches!(self, FieldValue::Value(Value::Null))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            FieldValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_result(self) -> Option<FetcherResult> {
        match self {
            FieldValue::Result(result) => Some(*result),
            _ => None,
        }
    }

    pub fn into_future(self) -> Option<ValueFuture> {
        match self {
            FieldValue::Future(future) => Some(future),
            _ => None,
        }
    }

    pub fn into_stream(self) -> Option<ValueStream> {
        match self {
            FieldValue::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn downcast<T: Any>(self) -> Option<T> {
        match self {
            FieldValue::Opaque(value) => value.downcast::<T>().ok().map(|value| *value),
            _ => None,
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<FetcherResult> for FieldValue {
    fn from(result: FetcherResult) -> Self {
        FieldValue::result(result)
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Value(value) => f.debug_tuple("Value").field(value).finish(),
            FieldValue::Result(result) => f.debug_tuple("Result").field(result).finish(),
            FieldValue::Future(_) => f.write_str("Future(..)"),
            FieldValue::Stream(_) => f.write_str("Stream(..)"),
            FieldValue::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

/// A field value paired with errors and an optional local context for the child fields.
///
/// The data is usually null when there are errors, but partial data is allowed.
pub struct FetcherResult {
    pub data: FieldValue,
    pub errors: Vec<graphql::Error>,
    pub local_context: Option<LocalContext>,
}

impl FetcherResult {
    pub fn new(data: impl Into<FieldValue>) -> Self {
        FetcherResult {
            data: data.into(),
            errors: Vec::new(),
            local_context: None,
        }
    }

    pub fn with_error(mut self, error: graphql::Error) -> Self {
        self.errors.push(error);
        self
    }

    pub fn with_errors(mut self, errors: impl IntoIterator<Item = graphql::Error>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_local_context(mut self, local_context: LocalContext) -> Self {
        self.local_context = Some(local_context);
        self
    }

    /// Null data with the error of a request cancelled by the client.
    pub fn cancelled() -> Self {
        FetcherResult::new(Value::Null).with_error(graphql::Error::cancelled_by_client())
    }
}

impl fmt::Debug for FetcherResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetcherResult")
            .field("data", &self.data)
            .field("errors", &self.errors)
            .field("local_context", &self.local_context.is_some())
            .finish()
    }
}

/// Everything a data fetcher gets to compute the value of one field.
#[derive(Clone)]
pub struct FetchEnvironment {
    /// The request context, shared by all fields of the request.
    pub context: Context,
    /// The local context set by the parent field's data fetcher.
    pub local_context: Option<LocalContext>,
    /// The field being resolved.
    pub field: FieldCoordinates,
    /// Where the field's value goes in the response.
    pub path: Path,
    pub arguments: Object,
    /// The value of the parent field.
    pub source: Value,
}

impl FetchEnvironment {
    pub fn new(context: Context, field: FieldCoordinates) -> Self {
        FetchEnvironment {
            context,
            local_context: None,
            field,
            path: Path::empty(),
            arguments: Object::new(),
            source: Value::Null,
        }
    }

    pub fn with_local_context(mut self, local_context: LocalContext) -> Self {
        self.local_context = Some(local_context);
        self
    }

    pub fn with_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }

    pub fn with_arguments(mut self, arguments: Object) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_source(mut self, source: Value) -> Self {
        self.source = source;
        self
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }
}

impl fmt::Debug for FetchEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchEnvironment")
            .field("field", &self.field)
            .field("path", &self.path)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

/// Data fetchers built into the execution engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EngineFetcher {
    /// Reads a property of the parent value.
    Property,
    /// Serves the introspection fields.
    Introspection,
    /// Built by the engine's data fetcher factories, e.g. for batch loading.
    Factory,
    /// Applies argument validation around another data fetcher.
    Validation,
    Other,
}

/// Where a data fetcher comes from. Used to decide whether to decorate it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FetcherKind {
    /// Written by the application.
    #[default]
    Application,
    /// Only accesses a field of the parent value, no application logic.
    Trivial,
    /// Part of the execution engine.
    Engine(EngineFetcher),
}

/// The type of an argument or of a return value, as shown to documentation tooling.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TypeRef {
    name: String,
}

impl TypeRef {
    pub fn of<T: ?Sized>() -> Self {
        TypeRef {
            name: std::any::type_name::<T>().to_string(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        TypeRef { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A data fetcher that can describe itself to schema inspection and documentation tooling.
pub trait SelfDescribing: Send + Sync {
    /// A description of the data fetcher, e.g. the handler it calls.
    fn description(&self) -> String;

    fn return_type(&self) -> TypeRef;

    /// The arguments the data fetcher binds, by name.
    fn arguments(&self) -> IndexMap<String, TypeRef> {
        IndexMap::new()
    }

    /// Whether the data fetcher defers to a batch loader.
    fn is_batch_loading(&self) -> bool {
        false
    }
}

/// Computes the value of a field.
pub trait DataFetcher: Send + Sync + 'static {
    fn fetch(&self, env: &FetchEnvironment) -> Result<FieldValue, BoxError>;

    fn kind(&self) -> FetcherKind {
        FetcherKind::Application
    }

    /// The self description of this data fetcher, when it has one.
    fn as_self_describing(&self) -> Option<&dyn SelfDescribing> {
        None
    }
}

impl<T: DataFetcher + ?Sized> DataFetcher for Arc<T> {
    fn fetch(&self, env: &FetchEnvironment) -> Result<FieldValue, BoxError> {
        (**self).fetch(env)
    }

    fn kind(&self) -> FetcherKind {
        (**self).kind()
    }

    fn as_self_describing(&self) -> Option<&dyn SelfDescribing> {
        (**self).as_self_describing()
    }
}

/// A [`DataFetcher`] calling a closure.
pub struct FnFetcher<F> {
    fetch_fn: F,
    kind: FetcherKind,
}

impl<F> DataFetcher for FnFetcher<F>
where
    F: Fn(&FetchEnvironment) -> Result<FieldValue, BoxError> + Send + Sync + 'static,
{
    fn fetch(&self, env: &FetchEnvironment) -> Result<FieldValue, BoxError> {
        (self.fetch_fn)(env)
    }

    fn kind(&self) -> FetcherKind {
        self.kind
    }
}

impl<F> FnFetcher<F> {
    pub fn with_kind(mut self, kind: FetcherKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Returns an application [`DataFetcher`] calling `fetch_fn`.
pub fn from_fn<F>(fetch_fn: F) -> FnFetcher<F>
where
    F: Fn(&FetchEnvironment) -> Result<FieldValue, BoxError> + Send + Sync + 'static,
{
    FnFetcher {
        fetch_fn,
        kind: FetcherKind::Application,
    }
}

/// Reads the property named after the field from the parent value.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropertyFetcher;

impl DataFetcher for PropertyFetcher {
    fn fetch(&self, env: &FetchEnvironment) -> Result<FieldValue, BoxError> {
        Ok(env
            .source
            .as_object()
            .and_then(|object| object.get(env.field.field_name.as_str()))
            .cloned()
            .unwrap_or_default()
            .into())
    }

    fn kind(&self) -> FetcherKind {
        FetcherKind::Trivial
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    fn env(source: Value) -> FetchEnvironment {
        FetchEnvironment::new(Context::new(), FieldCoordinates::new("Book", "title"))
            .with_source(source)
    }

    #[test]
    fn property_fetcher_reads_parent() {
        let value = PropertyFetcher
            .fetch(&env(json!({ "title": "Dune" })))
            .unwrap()
            .into_value();
        assert_eq!(value, Some(json!("Dune")));

        let value = PropertyFetcher.fetch(&env(json!({}))).unwrap();
        assert!(value.is_absent());
        assert_eq!(PropertyFetcher.kind(), FetcherKind::Trivial);
    }

    #[test]
    fn fn_fetcher_calls_closure() {
        let fetcher = from_fn(|env: &FetchEnvironment| {
            Ok(FieldValue::from(json!(env.field.to_string())))
        });
        assert_eq!(
            fetcher.fetch(&env(Value::Null)).unwrap().into_value(),
            Some(json!("Book.title"))
        );
        assert_eq!(fetcher.kind(), FetcherKind::Application);
        assert!(fetcher.as_self_describing().is_none());

        let fetcher = fetcher.with_kind(FetcherKind::Engine(EngineFetcher::Validation));
        assert_eq!(
            fetcher.kind(),
            FetcherKind::Engine(EngineFetcher::Validation)
        );
    }

    #[test]
    fn opaque_values_downcast() {
        let value = FieldValue::opaque(42u8);
        assert!(!value.is_absent());
        assert_eq!(value.downcast::<u8>(), Some(42));
        assert_eq!(FieldValue::opaque(42u8).downcast::<u16>(), None);
    }

    #[test]
    fn cancelled_result() {
        let result = FetcherResult::cancelled();
        assert!(result.data.is_absent());
        assert_eq!(result.errors, vec![graphql::Error::cancelled_by_client()]);
    }
}
