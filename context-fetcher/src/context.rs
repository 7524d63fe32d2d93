//! Provide a [`Context`] shared by every data fetcher of a request.
//!
//! The context holds a DashMap which allows data to be passed along the whole request, the
//! request's [`CancellationSignal`], and optionally the [`ContextSnapshotFactory`] used to
//! propagate thread-local state into data fetchers.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower::BoxError;

use crate::cancellation::CancellationSignal;
use crate::json_ext::Value;
use crate::snapshot::ContextSnapshotFactory;

/// Holds [`Context`] entries.
pub(crate) type Entries = Arc<DashMap<String, Value>>;

/// Value a parent data fetcher hands down to the data fetchers of its child fields.
///
/// When the local context is itself a [`Context`], its entries overlay the request's entries
/// when capturing a snapshot for the child fields.
pub type LocalContext = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static CURRENT: Context;
}

/// Request-scoped context.
///
/// Cloning a context is cheap, clones share their entries and cancellation signal.
#[derive(Clone, Debug)]
pub struct Context {
    entries: Entries,
    cancellation: CancellationSignal,
    snapshot_factory: Option<Arc<ContextSnapshotFactory>>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            entries: Default::default(),
            cancellation: CancellationSignal::new(),
            snapshot_factory: None,
        }
    }

    /// Use `factory` instead of [`ContextSnapshotFactory::global`] for this request.
    pub fn with_snapshot_factory(mut self, factory: Arc<ContextSnapshotFactory>) -> Self {
        self.snapshot_factory = Some(factory);
        self
    }

    /// The context the currently polled decorated future or stream runs with.
    ///
    /// Its entries are the request's entries overlaid with the values captured for the field.
    pub fn current() -> Option<Context> {
        CURRENT.try_with(Clone::clone).ok()
    }

    pub(crate) fn scope<R>(self, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(self, f)
    }

    /// The entry stored under `key`, deserialized as a `V`.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, BoxError>
    where
        K: AsRef<str>,
        V: DeserializeOwned,
    {
        self.get_json_value(key.as_ref())
            .map(serde_json_bytes::from_value)
            .transpose()
            .map_err(BoxError::from)
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<(), BoxError>
    where
        K: Into<String>,
        V: Serialize,
    {
        self.insert_json_value(key, serde_json_bytes::to_value(value)?);
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub(crate) fn get_json_value(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    pub(crate) fn insert_json_value(&self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// A context with a copy of this context's entries, sharing its cancellation signal and
    /// snapshot factory.
    pub(crate) fn fork(&self) -> Context {
        Context {
            entries: Arc::new(
                self.entries
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect(),
            ),
            cancellation: self.cancellation.clone(),
            snapshot_factory: self.snapshot_factory.clone(),
        }
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }

    /// Signal that the client is no longer interested in the results of this request.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn snapshot_factory(&self) -> Arc<ContextSnapshotFactory> {
        self.snapshot_factory
            .clone()
            .unwrap_or_else(ContextSnapshotFactory::global)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn entries_round_trip_through_json() {
        let c = Context::new();
        c.insert("attempts", 2).unwrap();
        c.insert("attempts", 3).unwrap();
        assert_eq!(c.get("attempts").unwrap(), Some(3));
        assert_eq!(c.get::<_, i32>("missing").unwrap(), None);
        assert!(c.contains_key("attempts"));
    }

    #[test]
    fn mismatched_entry_type_is_an_error() {
        let c = Context::new();
        c.insert("tenant", "acme").unwrap();
        assert!(c.get::<_, i32>("tenant").is_err());
    }

    #[test]
    fn clones_share_entries_and_cancellation() {
        let c = Context::new();
        let clone = c.clone();
        clone.insert("tenant", "acme".to_string()).unwrap();
        clone.cancel();
        assert_eq!(c.get::<_, String>("tenant").unwrap().as_deref(), Some("acme"));
        assert!(c.is_cancelled());
    }

    #[test]
    fn fork_copies_entries_but_shares_cancellation() {
        let c = Context::new();
        c.insert("tenant", "acme".to_string()).unwrap();
        let fork = c.fork();
        fork.insert("tenant", "other".to_string()).unwrap();
        assert_eq!(c.get::<_, String>("tenant").unwrap().as_deref(), Some("acme"));

        fork.cancel();
        assert!(c.is_cancelled());
    }

    #[test]
    fn current_is_scoped() {
        assert!(Context::current().is_none());
        let c = Context::new();
        c.insert("key", 1).unwrap();
        let seen = c.clone().scope(|| {
            Context::current()
                .and_then(|current| current.get::<_, i32>("key").unwrap())
        });
        assert_eq!(seen, Some(1));
        assert!(Context::current().is_none());
    }
}
