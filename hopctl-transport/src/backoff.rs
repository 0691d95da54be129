use futures::{FutureExt, Stream};
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::time::sleep;

/// A stream that yields exponentially increasing backoff durations.
///
/// Each item is yielded once its delay has elapsed, so `backoff.next().await` doubles as the
/// sleep between two attempts.
#[derive(Debug)]
pub struct ExponentialBackoff {
    /// Current number of retries.
    retry_count: usize,
    /// Maximum number of retries before closing the stream.
    /// If `None`, the stream will retry indefinitely.
    max_retries: Option<usize>,
    /// The current backoff duration.
    backoff: Duration,
    /// The current backoff timeout, if any.
    /// We need the timeout to be pinned (`Sleep` is not `Unpin`)
    timeout: Option<Pin<Box<tokio::time::Sleep>>>,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff stream with the given initial duration and max retries.
    pub const fn new(initial: Duration, max_retries: Option<usize>) -> Self {
        Self { retry_count: 0, max_retries, backoff: initial, timeout: None }
    }

    pub const fn retry_count(&self) -> usize {
        self.retry_count
    }

    /// (Re)-set the timeout to the current backoff duration.
    fn reset_timeout(&mut self) {
        self.timeout = Some(Box::pin(sleep(self.backoff)));
    }
}

impl Stream for ExponentialBackoff {
    type Item = Duration;

    /// Polls the exponential backoff stream. Returns `Poll::Ready` with the elapsed backoff
    /// duration once the timeout fires, `Poll::Ready(None)` once retries are exhausted, and
    /// `Poll::Pending` otherwise.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            let Some(ref mut timeout) = this.timeout else {
                // Close the stream before sleeping for a retry that will never happen.
                if let Some(max_retries) = this.max_retries {
                    if this.retry_count >= max_retries {
                        return Poll::Ready(None);
                    }
                }

                this.reset_timeout();
                continue;
            };

            if timeout.poll_unpin(cx).is_ready() {
                let elapsed = this.backoff;
                this.backoff *= 2;
                this.retry_count += 1;
                this.timeout = None;

                return Poll::Ready(Some(elapsed));
            }

            return Poll::Pending;
        }
    }
}
