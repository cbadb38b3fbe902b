//! Result sinks.

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::exec::dispatch::WorkerSlot;

/// Receiver of an operation's signals.
///
/// An operation calls `on_next` zero or more times followed by at most one
/// of `on_error` or `on_completed`. A cancelled operation calls neither.
pub trait Observer<T> {
    fn on_next(&mut self, item: T);
    fn on_error(&mut self, error: Error);
    fn on_completed(&mut self);
}

/// A signal as it crosses from the worker to the consumer.
#[derive(Debug)]
pub(crate) enum Signal<T> {
    Next(T),
    Error(Error),
    Completed,
}

/// Observer forwarding signals to a [`ResultStream`](super::ResultStream).
///
/// Hand-off blocks the worker while the channel is full, so a slow consumer
/// throttles the cursor. A blocked worker is parked in its dispatcher slot,
/// and the hand-off is abandoned as soon as the operation is cancelled.
pub struct ChannelObserver<T> {
    tx: mpsc::Sender<Signal<T>>,
    cancel: CancellationToken,
    slot: WorkerSlot,
}

impl<T: Send> ChannelObserver<T> {
    pub(crate) fn new(tx: mpsc::Sender<Signal<T>>, cancel: CancellationToken, slot: WorkerSlot) -> Self {
        Self { tx, cancel, slot }
    }

    fn send(&mut self, signal: Signal<T>) {
        let signal = match self.tx.try_send(signal) {
            Ok(()) => return,
            Err(TrySendError::Closed(_)) => {
                tracing::trace!("Consumer gone, dropping signal");
                return;
            }
            Err(TrySendError::Full(signal)) => signal,
        };

        let tx = &self.tx;
        let cancel = &self.cancel;
        self.slot.park(|| {
            futures::executor::block_on(async {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        tracing::trace!("Cancelled while waiting for consumer");
                    }
                    result = tx.send(signal) => {
                        if result.is_err() {
                            tracing::trace!("Consumer gone, dropping signal");
                        }
                    }
                }
            });
        });
    }
}

impl<T: Send> Observer<T> for ChannelObserver<T> {
    fn on_next(&mut self, item: T) {
        self.send(Signal::Next(item));
    }

    fn on_error(&mut self, error: Error) {
        self.send(Signal::Error(error));
    }

    fn on_completed(&mut self) {
        self.send(Signal::Completed);
    }
}
