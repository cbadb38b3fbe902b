//! Execution tasks: one connection-scoped resource chain per task.
//!
//! A task acquires a connection, binds its template to a prepared
//! operation and, for reads, opens a cursor. All three are released in
//! reverse order before the task signals completion or an error, because a
//! consumer may start a new operation as soon as it sees that signal.
//!
//! The chain below the connection is shared with sessions, which run
//! statements on a connection they already hold.

use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{Connection, ConnectionProvider, Cursor, PreparedOperation, Record};
use crate::error::{prefer_first, Result};
use crate::exec::observer::Observer;
use crate::observability::metrics::{record_rows, record_task};
use crate::statement::StatementTemplate;

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Slice of a query's rows to deliver: skip `first_result` rows, then
/// deliver at most `max_results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RowWindow {
    pub first_result: usize,
    pub max_results: Option<usize>,
}

impl RowWindow {
    /// Every row.
    pub const ALL: Self = Self {
        first_result: 0,
        max_results: None,
    };

    pub fn skip(mut self, rows: usize) -> Self {
        self.first_result = rows;
        self
    }

    pub fn limit(mut self, rows: usize) -> Self {
        self.max_results = Some(rows);
        self
    }

    fn is_full(&self, delivered: usize) -> bool {
        self.max_results.is_some_and(|max| delivered >= max)
    }
}

/// How the cursor loop ended when it ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drained {
    Exhausted,
    Cancelled,
}

/// A unit of blocking work against one statement template.
///
/// Runs synchronously on whichever thread calls `run_query` or
/// `run_update`; resources it acquires never leave that thread.
pub struct ExecutionTask<P: ConnectionProvider> {
    id: Uuid,
    provider: Arc<P>,
    template: StatementTemplate,
    window: RowWindow,
    cancel: CancellationToken,
}

impl<P: ConnectionProvider> ExecutionTask<P> {
    pub fn new(provider: Arc<P>, template: StatementTemplate, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::now_v7(),
            provider,
            template,
            window: RowWindow::ALL,
            cancel,
        }
    }

    /// Restrict a query to `window`. Updates ignore it.
    pub fn with_window(mut self, window: RowWindow) -> Self {
        self.window = window;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn template(&self) -> &StatementTemplate {
        &self.template
    }

    /// Token whose cancellation stops this task at its next row boundary,
    /// or interrupts the running statement when the connection allows it.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stream the template's query rows to `observer`.
    ///
    /// Rows are delivered in cursor order. The cancellation flag is checked
    /// before the connection is acquired and after every advance, before
    /// the row is delivered.
    pub fn run_query<O: Observer<Record>>(self, observer: &mut O) -> TaskState {
        let started = Instant::now();
        if self.cancel.is_cancelled() {
            tracing::debug!(task = %self.id, "Cancelled before start");
            return self.finish("query", TaskState::Cancelled, started, 0);
        }
        tracing::debug!(task = %self.id, statement = %self.template, "Running query");

        let mut delivered = 0_u64;
        let outcome = self.stream_rows(&mut |record| {
            observer.on_next(record);
            delivered += 1;
        });

        let state = match outcome {
            Ok(Drained::Exhausted) => {
                observer.on_completed();
                TaskState::Completed
            }
            Ok(Drained::Cancelled) => {
                tracing::debug!(task = %self.id, delivered, "Cancellation observed");
                TaskState::Cancelled
            }
            Err(err) if self.cancel.is_cancelled() => {
                tracing::debug!(task = %self.id, error = %err, "Error after cancellation not signalled");
                TaskState::Cancelled
            }
            Err(err) => {
                tracing::debug!(task = %self.id, error = %err, "Query failed");
                observer.on_error(err);
                TaskState::Failed
            }
        };
        self.finish("query", state, started, delivered)
    }

    /// Execute the template once as a mutation and emit the rows affected.
    ///
    /// The count is emitted only after every resource has been released, so
    /// a release failure surfaces as the sole error signal.
    pub fn run_update<O: Observer<u64>>(self, observer: &mut O) -> TaskState {
        let started = Instant::now();
        if self.cancel.is_cancelled() {
            tracing::debug!(task = %self.id, "Cancelled before start");
            return self.finish("update", TaskState::Cancelled, started, 0);
        }
        tracing::debug!(task = %self.id, statement = %self.template, "Running update");

        let outcome = self.execute_once();

        let state = match outcome {
            _ if self.cancel.is_cancelled() => TaskState::Cancelled,
            Ok(count) => {
                observer.on_next(count);
                observer.on_completed();
                TaskState::Completed
            }
            Err(err) => {
                tracing::debug!(task = %self.id, error = %err, "Update failed");
                observer.on_error(err);
                TaskState::Failed
            }
        };
        let delivered = u64::from(state == TaskState::Completed);
        self.finish("update", state, started, delivered)
    }

    fn stream_rows(&self, sink: &mut dyn FnMut(Record)) -> Result<Drained> {
        let mut connection = self.provider.acquire()?;
        let interrupt = connection.interrupt_on(&self.cancel);
        let outcome = query_on(&self.template, &mut connection, self.window, &self.cancel, sink);
        drop(interrupt);
        prefer_first(outcome, connection.release())
    }

    fn execute_once(&self) -> Result<u64> {
        let mut connection = self.provider.acquire()?;
        let interrupt = connection.interrupt_on(&self.cancel);
        let outcome = execute_on(&self.template, &mut connection);
        drop(interrupt);
        prefer_first(outcome, connection.release())
    }

    fn finish(self, kind: &'static str, state: TaskState, started: Instant, rows: u64) -> TaskState {
        let elapsed = started.elapsed();
        tracing::debug!(
            task = %self.id,
            outcome = state.as_str(),
            rows,
            elapsed_ms = elapsed.as_millis() as u64,
            "Task finished"
        );
        record_task(kind, state.as_str(), elapsed.as_secs_f64());
        record_rows(kind, rows);
        state
    }
}

/// Run `template` as a query on a connection the caller owns, feeding the
/// rows inside `window` to `sink`.
///
/// The operation and cursor are released here, in reverse order; the
/// connection is left to the caller.
pub(crate) fn query_on<C: Connection>(
    template: &StatementTemplate,
    connection: &mut C,
    window: RowWindow,
    cancel: &CancellationToken,
    sink: &mut dyn FnMut(Record),
) -> Result<Drained> {
    let mut operation = template.bind(connection)?;
    let outcome = drain_operation(&mut operation, window, cancel, sink);
    prefer_first(outcome, operation.release())
}

/// Run `template` once as a mutation on a connection the caller owns.
pub(crate) fn execute_on<C: Connection>(template: &StatementTemplate, connection: &mut C) -> Result<u64> {
    let mut operation = template.bind(connection)?;
    let outcome = operation.execute();
    prefer_first(outcome, operation.release())
}

fn drain_operation<Op: PreparedOperation>(
    operation: &mut Op,
    window: RowWindow,
    cancel: &CancellationToken,
    sink: &mut dyn FnMut(Record),
) -> Result<Drained> {
    let mut cursor = operation.query()?;
    let outcome = drain_cursor(&mut cursor, window, cancel, sink);
    prefer_first(outcome, cursor.release())
}

fn drain_cursor<Cu: Cursor>(
    cursor: &mut Cu,
    window: RowWindow,
    cancel: &CancellationToken,
    sink: &mut dyn FnMut(Record),
) -> Result<Drained> {
    let mut skipped = 0;
    let mut delivered = 0;
    while !window.is_full(delivered) {
        let Some(record) = cursor.advance()? else {
            break;
        };
        if cancel.is_cancelled() {
            return Ok(Drained::Cancelled);
        }
        if skipped < window.first_result {
            skipped += 1;
            continue;
        }
        sink(record);
        delivered += 1;
    }
    Ok(Drained::Exhausted)
}
