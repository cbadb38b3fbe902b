//! Asynchronous execution core.
//!
//! Provides:
//! - [`ExecutionTask`]: blocking, connection-scoped work with ordered release
//! - [`Dispatcher`]: hands tasks to workers off the submitting thread
//! - [`ResultStream`]: the consumer-facing, cancellable sequence of results

pub mod dispatch;
pub mod observer;
pub mod stream;
pub mod task;

pub use dispatch::{Dispatched, Dispatcher, Job, TokioDispatcher, WorkerSlot};
pub use observer::{ChannelObserver, Observer};
pub use stream::{spawn_stream, CancelHandle, ResultStream, Termination};
pub use task::{ExecutionTask, RowWindow, TaskState};
