//! The data fetcher decorator installed on every application data fetcher.
//!
//! A decorated data fetcher:
//! - re-installs the request's thread-local state around the wrapped data fetcher, and around
//!   every poll of the future or stream it returns,
//! - turns recognized asynchronous values into a [`FieldValue::Future`] (streams are collected
//!   into a list) or, for subscription fields, a [`FieldValue::Stream`],
//! - stops in-flight futures and streams when the client cancels the request,
//! - turns subscription stream errors into GraphQL errors.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::StreamExt;
use tower::BoxError;

use crate::adapter::AdapterRegistry;
use crate::adapter::SingleValue;
use crate::context::Context;
use crate::error::FetchError;
use crate::fetcher::DataFetcher;
use crate::fetcher::FetchEnvironment;
use crate::fetcher::FetcherKind;
use crate::fetcher::FetcherResult;
use crate::fetcher::FieldValue;
use crate::fetcher::SelfDescribing;
use crate::snapshot::ContextSnapshot;
use crate::subscription;
use crate::subscription::SubscriptionExceptionResolver;

/// Wraps a [`DataFetcher`]. See the [module documentation](self).
pub struct ContextDataFetcherDecorator {
    delegate: Arc<dyn DataFetcher>,
    subscription: bool,
    exception_resolver: Arc<dyn SubscriptionExceptionResolver>,
    adapters: Arc<AdapterRegistry>,
}

impl ContextDataFetcherDecorator {
    /// Decorate `delegate`. `subscription` is true for the fields of the subscription root type.
    pub fn new(
        delegate: Arc<dyn DataFetcher>,
        subscription: bool,
        exception_resolver: Arc<dyn SubscriptionExceptionResolver>,
        adapters: Arc<AdapterRegistry>,
    ) -> Self {
        Self {
            delegate,
            subscription,
            exception_resolver,
            adapters,
        }
    }

    pub fn delegate(&self) -> &Arc<dyn DataFetcher> {
        &self.delegate
    }

    pub fn is_subscription(&self) -> bool {
        self.subscription
    }

    fn update_value(
        &self,
        env: &FetchEnvironment,
        value: FieldValue,
        snapshot: &ContextSnapshot,
    ) -> Result<FieldValue, BoxError> {
        if value.is_absent() {
            return Ok(value);
        }
        let context = &env.context;
        if context.is_cancelled() {
            tracing::trace!(field = %env.field, "request cancelled, skipping field value");
            return Ok(FieldValue::result(FetcherResult::cancelled()));
        }

        if self.subscription {
            let stream = self
                .adapters
                .to_subscription_stream(value)
                .map_err(|_| FetchError::SubscriptionNotStreamable {
                    field: env.field.clone(),
                })?;
            let stream = subscription::resolve_errors(stream, self.exception_resolver.clone());
            let stream = context.cancellation().bind_stream(stream);
            return Ok(FieldValue::Stream(
                snapshot.instrument(stream, context).boxed(),
            ));
        }

        match self.adapters.to_single(value) {
            SingleValue::Future(future) => {
                let future = context.cancellation().bind_future(future);
                Ok(FieldValue::Future(
                    snapshot.instrument(future, context).boxed(),
                ))
            }
            SingleValue::Passthrough(value) => Ok(value),
        }
    }
}

fn capture(env: &FetchEnvironment) -> ContextSnapshot {
    let factory = env.context.snapshot_factory();
    match env
        .local_context
        .as_ref()
        .and_then(|local| local.downcast_ref::<Context>())
    {
        Some(local) => factory.capture_from_local(&env.context, local),
        None => factory.capture_from(&env.context),
    }
}

impl DataFetcher for ContextDataFetcherDecorator {
    fn fetch(&self, env: &FetchEnvironment) -> Result<FieldValue, BoxError> {
        let snapshot = capture(env);
        let value = snapshot.wrap(|| self.delegate.fetch(env))?;

        match value {
            FieldValue::Result(result) => {
                let FetcherResult {
                    data,
                    errors,
                    local_context,
                } = *result;
                Ok(FieldValue::result(FetcherResult {
                    data: self.update_value(env, data, &snapshot)?,
                    errors,
                    local_context,
                }))
            }
            value => self.update_value(env, value, &snapshot),
        }
    }

    fn kind(&self) -> FetcherKind {
        self.delegate.kind()
    }

    fn as_self_describing(&self) -> Option<&dyn SelfDescribing> {
        self.delegate.as_self_describing()
    }
}

impl fmt::Debug for ContextDataFetcherDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDataFetcherDecorator")
            .field("subscription", &self.subscription)
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}
