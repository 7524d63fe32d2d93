//! Classification of data fetcher values into plain values, single async values and streams.
//!
//! Data fetchers may return any asynchronous type as a [`FieldValue::Opaque`]. The
//! [`AdapterRegistry`] tries its adapters in registration order to turn such a value into a
//! [`ValueFuture`] or a [`ValueStream`]. Values no adapter recognizes are returned unchanged.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use futures::FutureExt;
use futures::StreamExt;
use futures::TryFutureExt;
use futures::TryStreamExt;
use futures::stream;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::task::AbortOnDropHandle;
use tower::BoxError;

use crate::fetcher::FieldValue;
use crate::fetcher::ValueFuture;
use crate::fetcher::ValueStream;
use crate::json_ext::Value;

/// The canonical form of an asynchronous value.
pub enum Adapted {
    Single(ValueFuture),
    Stream(ValueStream),
}

/// Outcome of classifying a [`FieldValue`].
pub enum Classified {
    /// One value, produced later.
    Single(ValueFuture),
    /// Any number of values, produced over time.
    Stream(ValueStream),
    /// Not asynchronous, returned unchanged.
    Passthrough(FieldValue),
}

/// Outcome of classifying a [`FieldValue`] for a field expecting a single value.
pub enum SingleValue {
    /// One value, produced later. Streams are collected into one.
    Future(ValueFuture),
    /// Not asynchronous, returned unchanged.
    Passthrough(FieldValue),
}

impl fmt::Debug for SingleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SingleValue::Future(_) => f.write_str("Future(..)"),
            SingleValue::Passthrough(value) => f.debug_tuple("Passthrough").field(value).finish(),
        }
    }
}

impl fmt::Debug for Classified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classified::Single(_) => f.write_str("Single(..)"),
            Classified::Stream(_) => f.write_str("Stream(..)"),
            Classified::Passthrough(value) => f.debug_tuple("Passthrough").field(value).finish(),
        }
    }
}

/// Converts values of some asynchronous type into their canonical form.
pub trait AsyncAdapter: Send + Sync + 'static {
    /// Adapt `value`, or hand it back untouched if it is not of the adapted type.
    fn adapt(&self, value: Box<dyn Any + Send>) -> Result<Adapted, Box<dyn Any + Send>>;
}

struct TypedAdapter<T, F> {
    adapt_fn: F,
    // fn() keeps the adapter Send + Sync whatever T is
    _marker: PhantomData<fn() -> T>,
}

impl<T, F> AsyncAdapter for TypedAdapter<T, F>
where
    T: Any + Send,
    F: Fn(T) -> Adapted + Send + Sync + 'static,
{
    fn adapt(&self, value: Box<dyn Any + Send>) -> Result<Adapted, Box<dyn Any + Send>> {
        value
            .downcast::<T>()
            .map(|value| (self.adapt_fn)(*value))
    }
}

/// Ordered set of [`AsyncAdapter`]s.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn AsyncAdapter>>,
}

impl AdapterRegistry {
    /// A registry without any adapter. Only [`FieldValue::Future`] and [`FieldValue::Stream`]
    /// are recognized.
    pub fn empty() -> Self {
        AdapterRegistry {
            adapters: Vec::new(),
        }
    }

    pub fn register(&mut self, adapter: impl AsyncAdapter) -> &mut Self {
        self.adapters.push(Box::new(adapter));
        self
    }

    /// Recognize values of type `T` as a single value produced later.
    pub fn register_single<T, F>(&mut self, adapt_fn: F) -> &mut Self
    where
        T: Any + Send,
        F: Fn(T) -> ValueFuture + Send + Sync + 'static,
    {
        self.register(TypedAdapter {
            adapt_fn: move |value: T| Adapted::Single(adapt_fn(value)),
            _marker: PhantomData::<fn() -> T>,
        })
    }

    /// Recognize values of type `T` as a stream of values.
    pub fn register_stream<T, F>(&mut self, adapt_fn: F) -> &mut Self
    where
        T: Any + Send,
        F: Fn(T) -> ValueStream + Send + Sync + 'static,
    {
        self.register(TypedAdapter {
            adapt_fn: move |value: T| Adapted::Stream(adapt_fn(value)),
            _marker: PhantomData::<fn() -> T>,
        })
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Classify `value`, trying the adapters in registration order for opaque values.
    pub fn classify(&self, value: FieldValue) -> Classified {
        match value {
            FieldValue::Future(future) => Classified::Single(future),
            FieldValue::Stream(stream) => Classified::Stream(stream),
            FieldValue::Opaque(mut opaque) => {
                for adapter in &self.adapters {
                    match adapter.adapt(opaque) {
                        Ok(Adapted::Single(future)) => return Classified::Single(future),
                        Ok(Adapted::Stream(stream)) => return Classified::Stream(stream),
                        Err(unchanged) => opaque = unchanged,
                    }
                }
                Classified::Passthrough(FieldValue::Opaque(opaque))
            }
            value => Classified::Passthrough(value),
        }
    }

    /// Classify `value` for a field expecting a single value.
    ///
    /// Streams are collected into one list value, in the order of their items.
    pub fn to_single(&self, value: FieldValue) -> SingleValue {
        match self.classify(value) {
            Classified::Single(future) => SingleValue::Future(future),
            Classified::Stream(stream) => SingleValue::Future(
                stream
                    .try_collect::<Vec<_>>()
                    .map_ok(Value::Array)
                    .boxed(),
            ),
            Classified::Passthrough(value) => SingleValue::Passthrough(value),
        }
    }

    /// Adapt `value` for a subscription field. A single async value becomes a stream of at most
    /// one item; anything else that is not a stream is handed back.
    pub fn to_subscription_stream(&self, value: FieldValue) -> Result<ValueStream, FieldValue> {
        match self.classify(value) {
            Classified::Stream(stream) => Ok(stream),
            Classified::Single(future) => Ok(stream::once(future)
                .try_filter(|value| futures::future::ready(!value.is_null()))
                .boxed()),
            Classified::Passthrough(value) => Err(value),
        }
    }
}

impl Default for AdapterRegistry {
    /// A registry recognizing tokio's channels and task handles.
    fn default() -> Self {
        let mut registry = AdapterRegistry::empty();
        registry
            .register_single(|receiver: oneshot::Receiver<Value>| {
                receiver.map_err(BoxError::from).boxed()
            })
            .register_single(|receiver: oneshot::Receiver<Result<Value, BoxError>>| {
                receiver
                    .map(|result| result.map_err(BoxError::from).and_then(|value| value))
                    .boxed()
            })
            .register_single(|handle: JoinHandle<Result<Value, BoxError>>| {
                // dropping the future, e.g. on cancellation, aborts the task
                AbortOnDropHandle::new(handle)
                    .map(|result| result.map_err(BoxError::from).and_then(|value| value))
                    .boxed()
            })
            .register_stream(|receiver: mpsc::Receiver<Value>| {
                ReceiverStream::new(receiver).map(Ok).boxed()
            })
            .register_stream(|receiver: mpsc::UnboundedReceiver<Value>| {
                UnboundedReceiverStream::new(receiver).map(Ok).boxed()
            })
            .register_stream(|receiver: broadcast::Receiver<Value>| {
                BroadcastStream::new(receiver)
                    .map_err(BoxError::from)
                    .boxed()
            });
        registry
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.adapters.len())
            .finish()
    }
}
