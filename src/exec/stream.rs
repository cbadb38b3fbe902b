//! Consumer side of a dispatched operation.
//!
//! A [`ResultStream`] is a lazy, finite, non-restartable sequence. Rows are
//! produced on a worker and handed over through a bounded channel; the
//! stream yields them in order and then either ends (completion), yields a
//! single error and ends (failure), or ends silently (cancellation).

use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use crate::error::{Error, Result};
use crate::exec::dispatch::{Dispatched, Dispatcher};
use crate::exec::observer::{ChannelObserver, Signal};

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Completed,
    Failed,
    Cancelled,
}

/// Cloneable handle that cancels one in-flight operation.
#[derive(Clone)]
pub struct CancelHandle {
    token: CancellationToken,
    abort: AbortHandle,
}

impl CancelHandle {
    /// Stop the operation at its next row boundary, interrupting a running
    /// statement when the backend supports it.
    ///
    /// A job that has not started yet never starts. Cancelling after the
    /// operation has terminated has no effect.
    pub fn cancel(&self) {
        self.token.cancel();
        self.abort.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Stream of results from one dispatched operation.
///
/// Dropping the stream cancels the operation.
pub struct ResultStream<T> {
    rx: mpsc::Receiver<Signal<T>>,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    dispatched: Dispatched,
    termination: Option<Termination>,
}

impl<T> Unpin for ResultStream<T> {}

impl<T> ResultStream<T> {
    pub(crate) fn new(
        rx: mpsc::Receiver<Signal<T>>,
        token: CancellationToken,
        dispatched: Dispatched,
    ) -> Self {
        Self {
            rx,
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
            dispatched,
            termination: None,
        }
    }

    /// Cancel the operation. Rows already buffered are discarded.
    pub fn cancel(&self) {
        self.token.cancel();
        self.dispatched.abort();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.token.clone(),
            abort: self.dispatched.abort_handle(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// How the stream ended, or `None` while it is still live.
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Drain the stream, returning every item or the first error.
    ///
    /// A cancelled stream returns the items received before cancellation.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        use futures::StreamExt;

        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }

    /// Drain a stream expected to produce at most one item.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or an illegal-state error when more
    /// than one item arrives.
    pub async fn single(self) -> Result<Option<T>> {
        let mut items = self.collect_all().await?;
        match items.len() {
            0 | 1 => Ok(items.pop()),
            n => Err(Error::illegal_state(format!(
                "expected at most one item, received {n}"
            ))),
        }
    }

    fn terminate(&mut self, termination: Termination) {
        self.termination = Some(termination);
        self.rx.close();
    }
}

impl<T> Stream for ResultStream<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.termination.is_some() {
            return Poll::Ready(None);
        }
        if this.token.is_cancelled() {
            this.terminate(Termination::Cancelled);
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Signal::Next(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(Signal::Error(err))) => {
                this.terminate(Termination::Failed);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(Signal::Completed)) => {
                this.terminate(Termination::Completed);
                Poll::Ready(None)
            }
            Poll::Ready(None) if this.token.is_cancelled() => {
                this.terminate(Termination::Cancelled);
                Poll::Ready(None)
            }
            Poll::Ready(None) => {
                tracing::warn!("Worker ended without a terminal signal");
                this.terminate(Termination::Failed);
                Poll::Ready(Some(Err(Error::Dispatch(
                    "worker ended without a terminal signal".into(),
                ))))
            }
            Poll::Pending => match this.cancelled.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    this.terminate(Termination::Cancelled);
                    Poll::Ready(None)
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl<T> Drop for ResultStream<T> {
    fn drop(&mut self) {
        if self.termination.is_none() {
            self.token.cancel();
            self.dispatched.abort();
        }
    }
}

impl<T> fmt::Debug for ResultStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStream")
            .field("cancelled", &self.token.is_cancelled())
            .field("termination", &self.termination)
            .finish()
    }
}

/// Submit `body` to `dispatcher` and return the stream it feeds.
///
/// `body` runs on the worker with an observer wired to the returned stream
/// and the operation's cancellation token. The observer parks the worker's
/// dispatcher slot whenever the stream's buffer is full.
pub fn spawn_stream<T, F>(dispatcher: &dyn Dispatcher, buffer: usize, body: F) -> ResultStream<T>
where
    T: Send + 'static,
    F: FnOnce(ChannelObserver<T>, CancellationToken) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let token = CancellationToken::new();
    let worker_token = token.clone();
    let dispatched = dispatcher.submit(Box::new(move |slot| {
        let observer = ChannelObserver::new(tx, worker_token.clone(), slot);
        body(observer, worker_token);
    }));
    ResultStream::new(rx, token, dispatched)
}
