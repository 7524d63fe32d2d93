//! Propagation of client cancellation into in-flight data fetcher work.
//!
//! All the data fetchers of a request share one [`CancellationSignal`]. The transport layer sets
//! it when the client goes away; futures and streams returned by decorated data fetchers stop as
//! soon as it is set.

use futures::FutureExt;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::WaitForCancellationFuture;

use crate::fetcher::ValueFuture;
use crate::fetcher::ValueStream;
use crate::json_ext::Value;

/// Per-request, monotonic cancellation flag. Once set it stays set.
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Setting it more than once, from any number of tasks, has no further effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the signal is set.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Returns a future that completes like `future`, or with `null` once the signal is set.
    ///
    /// The signal is checked before the value of `future` is returned, so a request cancelled
    /// while the value was being produced never sees it.
    pub fn bind_future(&self, future: ValueFuture) -> ValueFuture {
        let token = self.token.clone();
        async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::trace!("data fetcher future dropped, request was cancelled");
                    Ok(Value::Null)
                }
                result = future => result,
            }
        }
        .boxed()
    }

    /// Returns a stream that yields the items of `stream` until the signal is set.
    ///
    /// Items already produced keep their order, the stream simply ends early.
    pub fn bind_stream(&self, stream: ValueStream) -> ValueStream {
        stream.take_until(self.token.clone().cancelled_owned()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::stream;
    use serde_json_bytes::json;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    #[test]
    fn signal_is_monotonic() {
        let signal = CancellationSignal::new();
        let shared = signal.clone();
        assert!(!signal.is_cancelled());
        shared.cancel();
        shared.cancel();
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn bound_future_completes_normally() {
        let signal = CancellationSignal::new();
        let future = signal.bind_future(async { Ok(json!("value")) }.boxed());
        assert_eq!(future.await.unwrap(), json!("value"));
    }

    #[tokio::test]
    async fn bound_future_ignores_value_once_cancelled() {
        let signal = CancellationSignal::new();
        signal.cancel();
        let future = signal.bind_future(async { Ok(json!("value")) }.boxed());
        assert_eq!(future.await.unwrap(), Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn bound_future_stops_when_cancelled_in_flight() {
        let signal = CancellationSignal::new();
        let future = signal.bind_future(
            async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!("too late"))
            }
            .boxed(),
        );
        let handle = tokio::spawn(future);
        tokio::task::yield_now().await;
        signal.cancel();
        assert_eq!(handle.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn bound_stream_is_truncated() {
        let signal = CancellationSignal::new();
        let (tx, rx) = mpsc::channel(4);
        let mut stream = signal.bind_stream(ReceiverStream::new(rx).map(Ok).boxed());

        tx.send(json!(1)).await.unwrap();
        tx.send(json!(2)).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), json!(1));
        assert_eq!(stream.next().await.unwrap().unwrap(), json!(2));

        signal.cancel();
        tx.send(json!(3)).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn bound_stream_keeps_all_items_without_cancellation() {
        let signal = CancellationSignal::new();
        let items: Vec<_> = signal
            .bind_stream(stream::iter(vec![Ok(json!(1)), Ok(json!(2)), Ok(json!(3))]).boxed())
            .map(Result::unwrap)
            .collect()
            .await;
        assert_eq!(items, vec![json!(1), json!(2), json!(3)]);
    }
}
