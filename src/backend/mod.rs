//! Collaborator interfaces for the store backend.
//!
//! A connection provider hands out connections; a connection prepares
//! operations; an operation opens cursors. Each level borrows the level
//! above it, so a cursor cannot outlive its operation and an operation
//! cannot outlive its connection. `release` consumes the resource, which
//! makes double release unrepresentable and forces the reverse-acquisition
//! order at compile time.
//!
//! None of these types need to be `Send`: they are acquired, used and
//! released on a single worker thread. Only [`Record`]s leave that thread.

mod record;

pub use record::Record;

use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::Result;
use crate::statement::Value;

/// Source of connections, shared across workers.
pub trait ConnectionProvider: Send + Sync + 'static {
    type Connection: Connection;

    /// Acquire a connection. Fails with a resource error when the store is
    /// unreachable or the pool is exhausted.
    fn acquire(&self) -> Result<Self::Connection>;
}

/// A live, single-threaded connection.
pub trait Connection {
    type Operation<'c>: PreparedOperation
    where
        Self: 'c;

    /// Prepare `text` for execution. Fails with a binding error when the
    /// store rejects the statement text.
    fn prepare(&mut self, text: &str) -> Result<Self::Operation<'_>>;

    /// Interrupt whatever statement is running on this connection once
    /// `cancel` fires, until the returned guard is dropped.
    ///
    /// Connections that cannot be interrupted from another thread return
    /// `None`; their statements stop at the next row boundary instead.
    fn interrupt_on(&self, cancel: &CancellationToken) -> Option<DropGuard> {
        let _ = cancel;
        None
    }

    /// Return the connection to its provider.
    fn release(self) -> Result<()>;
}

/// A prepared statement bound to one connection.
pub trait PreparedOperation {
    type Cursor<'s>: Cursor
    where
        Self: 's;

    /// Number of parameter slots in the statement.
    fn parameter_count(&self) -> usize;

    /// Resolve a named parameter to its 1-based slot.
    fn parameter_index(&self, name: &str) -> Result<Option<usize>>;

    /// Bind `value` to the 1-based slot `index`.
    fn bind(&mut self, index: usize, value: &Value) -> Result<()>;

    /// Run the statement as a query, opening a forward-only cursor.
    fn query(&mut self) -> Result<Self::Cursor<'_>>;

    /// Run the statement as a mutation, returning the rows affected.
    fn execute(&mut self) -> Result<u64>;

    fn release(self) -> Result<()>;
}

/// A forward-only cursor over result rows.
pub trait Cursor {
    /// Advance to the next row, materializing it. `None` once exhausted.
    fn advance(&mut self) -> Result<Option<Record>>;

    fn release(self) -> Result<()>;
}
