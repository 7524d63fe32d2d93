//! Propagation of thread-local state into data fetchers.
//!
//! Thread-local values are registered with a [`ContextSnapshotFactory`] through
//! [`ThreadLocalAccessor`]s. At the start of a request, [`ContextSnapshotFactory::capture_all`]
//! reads them on the calling thread and [`ContextSnapshot::update_context`] stores them in the
//! request [`Context`]. Before each data fetcher runs, a snapshot is captured back from the
//! context and re-installed on whatever worker ends up running (or polling) the fetcher.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::thread::LocalKey;

use futures::Stream;
use once_cell::sync::Lazy;
use pin_project_lite::pin_project;

use crate::configuration::ContextPropagation;
use crate::context::Context;
use crate::json_ext::Value;

/// Reads and writes one thread-local value.
pub trait ThreadLocalAccessor: Send + Sync + 'static {
    /// The key the value is stored under in the request [`Context`].
    fn key(&self) -> &str;

    /// The value on the current thread, if set.
    fn get_value(&self) -> Option<Value>;

    fn set_value(&self, value: Value);

    /// Remove the value from the current thread.
    fn reset(&self);

    /// Put back a value previously returned by [`ThreadLocalAccessor::get_value`].
    fn restore(&self, previous: Option<Value>) {
        match previous {
            Some(value) => self.set_value(value),
            None => self.reset(),
        }
    }
}

/// [`ThreadLocalAccessor`] over a `thread_local!` holding an optional [`Value`].
///
/// ```ignore
/// thread_local! {
///     static TENANT: RefCell<Option<Value>> = const { RefCell::new(None) };
/// }
///
/// let accessor = LocalKeyAccessor::new("tenant", &TENANT);
/// ```
pub struct LocalKeyAccessor {
    key: String,
    local: &'static LocalKey<RefCell<Option<Value>>>,
}

impl LocalKeyAccessor {
    pub fn new(key: impl Into<String>, local: &'static LocalKey<RefCell<Option<Value>>>) -> Self {
        Self {
            key: key.into(),
            local,
        }
    }
}

impl ThreadLocalAccessor for LocalKeyAccessor {
    fn key(&self) -> &str {
        &self.key
    }

    fn get_value(&self) -> Option<Value> {
        self.local.with(|cell| cell.borrow().clone())
    }

    fn set_value(&self, value: Value) {
        self.local.with(|cell| *cell.borrow_mut() = Some(value));
    }

    fn reset(&self) {
        self.local.with(|cell| *cell.borrow_mut() = None);
    }
}

static GLOBAL: Lazy<Arc<ContextSnapshotFactory>> =
    Lazy::new(|| Arc::new(ContextSnapshotFactory::builder().build()));

/// Captures [`ContextSnapshot`]s for a set of thread-local accessors.
pub struct ContextSnapshotFactory {
    accessors: Arc<[Arc<dyn ThreadLocalAccessor>]>,
    clear_missing: bool,
    capture_keys: Option<HashSet<String>>,
}

impl ContextSnapshotFactory {
    pub fn builder() -> ContextSnapshotFactoryBuilder {
        ContextSnapshotFactoryBuilder::default()
    }

    /// Factory used by requests whose [`Context`] does not carry one. It has no accessors, so
    /// it only propagates the context itself.
    pub fn global() -> Arc<ContextSnapshotFactory> {
        GLOBAL.clone()
    }

    /// Build a factory for `accessors` with the options of `config`.
    pub fn from_config(
        config: &ContextPropagation,
        accessors: impl IntoIterator<Item = Arc<dyn ThreadLocalAccessor>>,
    ) -> ContextSnapshotFactory {
        let mut builder = ContextSnapshotFactory::builder()
            .accessors(accessors)
            .clear_missing(config.clear_missing);
        if let Some(keys) = &config.capture_keys {
            builder = builder.capture_keys(keys.iter().cloned());
        }
        builder.build()
    }

    fn captures(&self, key: &str) -> bool {
        self.capture_keys
            .as_ref()
            .is_none_or(|keys| keys.contains(key))
    }

    fn capture_with(
        &self,
        mut lookup: impl FnMut(&dyn ThreadLocalAccessor) -> Option<Value>,
    ) -> ContextSnapshot {
        let values = self
            .accessors
            .iter()
            .map(|accessor| {
                if self.captures(accessor.key()) {
                    lookup(accessor.as_ref())
                } else {
                    None
                }
            })
            .collect();
        ContextSnapshot {
            accessors: self.accessors.clone(),
            values,
            clear_missing: self.clear_missing,
        }
    }

    /// Capture the thread-local values of the current thread.
    pub fn capture_all(&self) -> ContextSnapshot {
        self.capture_with(|accessor| accessor.get_value())
    }

    /// Capture the values stored in `context`.
    pub fn capture_from(&self, context: &Context) -> ContextSnapshot {
        self.capture_with(|accessor| context.get_json_value(accessor.key()))
    }

    /// Capture the values stored in `context`, with the values of `local` taking precedence.
    pub fn capture_from_local(&self, context: &Context, local: &Context) -> ContextSnapshot {
        self.capture_with(|accessor| {
            local
                .get_json_value(accessor.key())
                .or_else(|| context.get_json_value(accessor.key()))
        })
    }
}

impl fmt::Debug for ContextSnapshotFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSnapshotFactory")
            .field(
                "accessors",
                &self
                    .accessors
                    .iter()
                    .map(|accessor| accessor.key())
                    .collect::<Vec<_>>(),
            )
            .field("clear_missing", &self.clear_missing)
            .field("capture_keys", &self.capture_keys)
            .finish()
    }
}

/// Builder for [`ContextSnapshotFactory`].
#[derive(Default)]
pub struct ContextSnapshotFactoryBuilder {
    accessors: Vec<Arc<dyn ThreadLocalAccessor>>,
    clear_missing: bool,
    capture_keys: Option<HashSet<String>>,
}

impl ContextSnapshotFactoryBuilder {
    pub fn accessor(mut self, accessor: impl ThreadLocalAccessor) -> Self {
        self.accessors.push(Arc::new(accessor));
        self
    }

    pub fn accessors(
        mut self,
        accessors: impl IntoIterator<Item = Arc<dyn ThreadLocalAccessor>>,
    ) -> Self {
        self.accessors.extend(accessors);
        self
    }

    /// Reset the thread-locals that have no captured value while a snapshot is installed,
    /// instead of leaving whatever the worker thread had.
    pub fn clear_missing(mut self, clear_missing: bool) -> Self {
        self.clear_missing = clear_missing;
        self
    }

    /// Only capture the accessors with one of these keys.
    pub fn capture_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.capture_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> ContextSnapshotFactory {
        ContextSnapshotFactory {
            accessors: self.accessors.into(),
            clear_missing: self.clear_missing,
            capture_keys: self.capture_keys,
        }
    }
}

/// Thread-local values captured at one point in time.
#[derive(Clone)]
pub struct ContextSnapshot {
    accessors: Arc<[Arc<dyn ThreadLocalAccessor>]>,
    // one slot per accessor
    values: Vec<Option<Value>>,
    clear_missing: bool,
}

impl ContextSnapshot {
    /// The captured value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.accessors
            .iter()
            .position(|accessor| accessor.key() == key)
            .and_then(|index| self.values[index].as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// Install the captured values on the current thread until the returned scope is dropped.
    pub fn set_thread_locals(&self) -> Scope {
        let mut previous = Vec::with_capacity(self.accessors.len());
        for (accessor, value) in self.accessors.iter().zip(&self.values) {
            match value {
                Some(value) => {
                    previous.push((accessor.clone(), accessor.get_value()));
                    accessor.set_value(value.clone());
                }
                None if self.clear_missing => {
                    previous.push((accessor.clone(), accessor.get_value()));
                    accessor.reset();
                }
                None => {}
            }
        }
        Scope { previous }
    }

    /// Run `f` with the captured values installed.
    pub fn wrap<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = self.set_thread_locals();
        f()
    }

    /// Returns a copy of `context` with the captured values overlaid on its entries.
    ///
    /// The copy shares the cancellation signal of `context`. Writes to the copy are not seen by
    /// `context`.
    pub fn update_context(&self, context: &Context) -> Context {
        let updated = context.fork();
        for (accessor, value) in self.accessors.iter().zip(&self.values) {
            if let Some(value) = value {
                updated.insert_json_value(accessor.key(), value.clone());
            }
        }
        updated
    }

    /// Attach this snapshot to a future or a stream.
    ///
    /// Every poll of the returned value runs with the captured thread-local values installed and
    /// with [`Context::current`] returning `context` updated with the captured values.
    pub fn instrument<T>(&self, inner: T, context: &Context) -> Snapshotted<T> {
        Snapshotted {
            inner,
            snapshot: self.clone(),
            context: self.update_context(context),
        }
    }
}

impl fmt::Debug for ContextSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.accessors
                    .iter()
                    .zip(&self.values)
                    .filter_map(|(accessor, value)| value.as_ref().map(|v| (accessor.key(), v))),
            )
            .finish()
    }
}

/// Restores the thread-local values replaced by [`ContextSnapshot::set_thread_locals`].
#[must_use = "the values are restored as soon as the scope is dropped"]
pub struct Scope {
    previous: Vec<(Arc<dyn ThreadLocalAccessor>, Option<Value>)>,
}

impl Drop for Scope {
    fn drop(&mut self) {
        while let Some((accessor, value)) = self.previous.pop() {
            accessor.restore(value);
        }
    }
}

pin_project! {
    /// A future or stream polled with a [`ContextSnapshot`] installed.
    pub struct Snapshotted<T> {
        #[pin]
        inner: T,
        snapshot: ContextSnapshot,
        context: Context,
    }
}

impl<F: Future> Future for Snapshotted<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let snapshot = &*this.snapshot;
        let inner = this.inner;
        this.context.clone().scope(|| {
            let _scope = snapshot.set_thread_locals();
            inner.poll(cx)
        })
    }
}

impl<S: Stream> Stream for Snapshotted<S> {
    type Item = S::Item;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.project();
        let snapshot = &*this.snapshot;
        let inner = this.inner;
        this.context.clone().scope(|| {
            let _scope = snapshot.set_thread_locals();
            inner.poll_next(cx)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
