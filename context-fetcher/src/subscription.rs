//! Resolution of subscription stream errors into GraphQL errors.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use tower::BoxError;

use crate::error::SubscriptionPublisherError;
use crate::fetcher::ValueStream;
use crate::graphql;

/// Turns an error raised by a subscription stream into GraphQL errors.
#[async_trait]
pub trait SubscriptionExceptionResolver: Send + Sync + 'static {
    /// Resolve `error`. An empty list means the error was not handled.
    async fn resolve_exception(&self, error: &BoxError) -> Vec<graphql::Error>;
}

type ResolveFn = dyn Fn(&BoxError) -> Vec<graphql::Error> + Send + Sync;

/// A [`SubscriptionExceptionResolver`] calling a synchronous function.
///
/// Runs on the worker polling the subscription stream, with the request's thread-local state
/// installed.
pub struct SubscriptionExceptionResolverAdapter {
    resolve_fn: Box<ResolveFn>,
}

impl SubscriptionExceptionResolverAdapter {
    /// Resolve errors to at most one GraphQL error.
    pub fn single_error<F>(resolve_fn: F) -> Self
    where
        F: Fn(&BoxError) -> Option<graphql::Error> + Send + Sync + 'static,
    {
        Self {
            resolve_fn: Box::new(move |error| resolve_fn(error).into_iter().collect()),
        }
    }

    pub fn multiple_errors<F>(resolve_fn: F) -> Self
    where
        F: Fn(&BoxError) -> Vec<graphql::Error> + Send + Sync + 'static,
    {
        Self {
            resolve_fn: Box::new(resolve_fn),
        }
    }
}

#[async_trait]
impl SubscriptionExceptionResolver for SubscriptionExceptionResolverAdapter {
    async fn resolve_exception(&self, error: &BoxError) -> Vec<graphql::Error> {
        (self.resolve_fn)(error)
    }
}

/// Tries a list of resolvers in order and keeps the first non-empty result.
///
/// Errors no resolver handles are resolved to [`graphql::Error::unresolved_subscription_error`],
/// so the result is never empty.
#[derive(Clone, Default)]
pub struct CompositeSubscriptionExceptionResolver {
    resolvers: Vec<Arc<dyn SubscriptionExceptionResolver>>,
}

impl CompositeSubscriptionExceptionResolver {
    pub fn new(resolvers: Vec<Arc<dyn SubscriptionExceptionResolver>>) -> Self {
        Self { resolvers }
    }
}

impl fmt::Debug for CompositeSubscriptionExceptionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeSubscriptionExceptionResolver")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

#[async_trait]
impl SubscriptionExceptionResolver for CompositeSubscriptionExceptionResolver {
    async fn resolve_exception(&self, error: &BoxError) -> Vec<graphql::Error> {
        for resolver in &self.resolvers {
            let errors = resolver.resolve_exception(error).await;
            if !errors.is_empty() {
                return errors;
            }
        }
        tracing::warn!("no subscription exception resolver handled error: {error}");
        vec![graphql::Error::unresolved_subscription_error()]
    }
}

/// Ends `stream` at its first error, replacing that error with a [`SubscriptionPublisherError`]
/// carrying the GraphQL errors `resolver` produced for it.
///
/// An error that already is a [`SubscriptionPublisherError`] ends the stream as is.
pub(crate) fn resolve_errors(
    stream: ValueStream,
    resolver: Arc<dyn SubscriptionExceptionResolver>,
) -> ValueStream {
    stream::unfold(Some(stream), move |state| {
        let resolver = resolver.clone();
        async move {
            let mut stream = state?;
            match stream.next().await? {
                Ok(value) => Some((Ok(value), Some(stream))),
                Err(error) if error.is::<SubscriptionPublisherError>() => {
                    tracing::trace!("subscription stream failed with already resolved errors");
                    Some((Err(error), None))
                }
                Err(error) => {
                    tracing::trace!("resolving subscription stream error: {error}");
                    let errors = resolver.resolve_exception(&error).await;
                    Some((
                        Err(SubscriptionPublisherError::new(errors, error).into()),
                        None,
                    ))
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use pretty_assertions::assert_eq;
    use serde_json_bytes::json;

    use super::*;

    struct Ignore;

    #[async_trait]
    impl SubscriptionExceptionResolver for Ignore {
        async fn resolve_exception(&self, _error: &BoxError) -> Vec<graphql::Error> {
            Vec::new()
        }
    }

    fn resolving_to(message: &'static str) -> Arc<dyn SubscriptionExceptionResolver> {
        Arc::new(SubscriptionExceptionResolverAdapter::single_error(
            move |_| Some(graphql::Error::builder().message(message).build()),
        ))
    }

    #[tokio::test]
    async fn composite_uses_first_non_empty_result() {
        let composite = CompositeSubscriptionExceptionResolver::new(vec![
            Arc::new(Ignore),
            resolving_to("second"),
            resolving_to("third"),
        ]);
        let errors = composite.resolve_exception(&"boom".into()).await;
        assert_eq!(errors, vec![graphql::Error::builder().message("second").build()]);
    }

    #[tokio::test]
    async fn composite_falls_back_to_default_error() {
        let composite = CompositeSubscriptionExceptionResolver::new(vec![Arc::new(Ignore)]);
        let errors = composite.resolve_exception(&"boom".into()).await;
        assert_eq!(errors, vec![graphql::Error::unresolved_subscription_error()]);

        let errors = CompositeSubscriptionExceptionResolver::default()
            .resolve_exception(&"boom".into())
            .await;
        assert_eq!(errors.len(), 1);
    }

    #[tokio::test]
    async fn adapter_can_inspect_error() {
        let adapter = SubscriptionExceptionResolverAdapter::multiple_errors(|error| {
            if error.to_string() == "timeout" {
                vec![
                    graphql::Error::builder().message("first").build(),
                    graphql::Error::builder().message("second").build(),
                ]
            } else {
                Vec::new()
            }
        });
        assert_eq!(adapter.resolve_exception(&"timeout".into()).await.len(), 2);
        assert!(adapter.resolve_exception(&"other".into()).await.is_empty());
    }

    #[tokio::test]
    async fn stream_error_becomes_terminal_publisher_error() {
        let source = stream::iter(vec![
            Ok(json!(1)),
            Ok(json!(2)),
            Err("boom".into()),
            Ok(json!(3)),
        ])
        .boxed();
        let items: Vec<_> = resolve_errors(source, resolving_to("resolved")).collect().await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &json!(1));
        assert_eq!(items[1].as_ref().unwrap(), &json!(2));
        let error = items[2]
            .as_ref()
            .unwrap_err()
            .downcast_ref::<SubscriptionPublisherError>()
            .unwrap();
        assert_eq!(
            error.errors(),
            &[graphql::Error::builder().message("resolved").build()]
        );
        assert_eq!(error.cause().to_string(), "boom");
    }

    #[tokio::test]
    async fn resolved_errors_are_not_resolved_twice() {
        let already = SubscriptionPublisherError::new(
            vec![graphql::Error::builder().message("from the fetcher").build()],
            "boom".into(),
        );
        let source = stream::iter(vec![Ok(json!(1)), Err(already.into())]).boxed();
        let items: Vec<_> = resolve_errors(source, resolving_to("resolved")).collect().await;

        assert_eq!(items.len(), 2);
        let error = items[1]
            .as_ref()
            .unwrap_err()
            .downcast_ref::<SubscriptionPublisherError>()
            .unwrap();
        assert_eq!(
            error.errors(),
            &[graphql::Error::builder().message("from the fetcher").build()]
        );
    }

    #[tokio::test]
    async fn streams_without_errors_are_unchanged() {
        let source = stream::iter(vec![Ok(json!(1)), Ok(json!(2))]).boxed();
        let items: Vec<_> = resolve_errors(source, resolving_to("resolved"))
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(items, vec![json!(1), json!(2)]);
    }
}
