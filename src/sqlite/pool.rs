//! Pooled SQLite connections.
//!
//! Uses r2d2 with r2d2_sqlite for pooled access. Each checkout is adapted to
//! the backend traits: a pooled connection prepares raw statements, and a
//! statement opens a forward-only row cursor.

use r2d2::{ManageConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::backend::{Connection, ConnectionProvider, Cursor, PreparedOperation, Record};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::statement::Value;

/// A connection checked out of a [`SqlitePool`].
pub type PooledSqlite = PooledConnection<StoreConnectionManager>;

/// Connection pool over one SQLite database file.
#[derive(Clone)]
pub struct SqlitePool {
    pool: Pool<StoreConnectionManager>,
}

impl SqlitePool {
    /// Create a new pool for the given database path.
    ///
    /// # Arguments
    ///
    /// * `db_path` - Path to the SQLite database file
    /// * `max_size` - Maximum number of connections in the pool
    /// * `busy_timeout` - How long a connection waits on a locked database
    ///
    /// # Errors
    ///
    /// Returns a resource error if the pool cannot be created.
    pub fn new<P: AsRef<Path>>(db_path: P, max_size: u32, busy_timeout: Duration) -> Result<Self> {
        let manager = StoreConnectionManager(SqliteConnectionManager::file(db_path));

        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_customizer(Box::new(StoreConnectionCustomizer { busy_timeout }))
            .build(manager)
            .map_err(|e| Error::resource("open", e))?;

        Ok(Self { pool })
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        Self::new(&config.db_path, config.pool_size, config.busy_timeout())
    }

    /// Check out a raw pooled connection.
    pub fn get(&self) -> Result<PooledSqlite> {
        self.pool.get().map_err(|e| Error::resource("acquire", e))
    }

    /// Get the current pool state for monitoring.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }
}

impl ConnectionProvider for SqlitePool {
    type Connection = SqliteConnection;

    fn acquire(&self) -> Result<SqliteConnection> {
        Ok(SqliteConnection::new(self.get()?))
    }
}

/// r2d2_sqlite's manager, except that a connection returned inside an open
/// transaction is discarded instead of handed to the next checkout.
#[derive(Debug)]
pub struct StoreConnectionManager(SqliteConnectionManager);

impl ManageConnection for StoreConnectionManager {
    type Connection = rusqlite::Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> std::result::Result<rusqlite::Connection, rusqlite::Error> {
        self.0.connect()
    }

    fn is_valid(&self, conn: &mut rusqlite::Connection) -> std::result::Result<(), rusqlite::Error> {
        self.0.is_valid(conn)
    }

    fn has_broken(&self, conn: &mut rusqlite::Connection) -> bool {
        if conn.is_autocommit() {
            return false;
        }
        tracing::warn!("Discarding pooled connection left inside a transaction");
        true
    }
}

/// Connection customizer that applies store pragmas.
#[derive(Debug)]
struct StoreConnectionCustomizer {
    busy_timeout: Duration,
}

impl r2d2::CustomizeConnection<rusqlite::Connection, rusqlite::Error> for StoreConnectionCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    }
}

/// A pooled connection checked out for one task or session.
pub struct SqliteConnection {
    conn: PooledSqlite,
}

impl SqliteConnection {
    pub(crate) fn new(conn: PooledSqlite) -> Self {
        Self { conn }
    }

    pub(crate) fn raw(&self) -> &rusqlite::Connection {
        &self.conn
    }
}

impl Connection for SqliteConnection {
    type Operation<'c> = SqliteOperation<'c> where Self: 'c;

    fn prepare(&mut self, text: &str) -> Result<SqliteOperation<'_>> {
        let stmt = self.conn.prepare(text).map_err(|e| Error::binding(e.to_string()))?;
        Ok(SqliteOperation { stmt })
    }

    fn interrupt_on(&self, cancel: &CancellationToken) -> Option<DropGuard> {
        // The watcher needs a runtime; synchronous callers fall back to
        // row-boundary checks.
        let runtime = Handle::try_current().ok()?;
        let interrupt = self.conn.get_interrupt_handle();
        let cancel = cancel.clone();
        let armed = CancellationToken::new();
        let disarmed = armed.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;
                () = disarmed.cancelled() => {}
                () = cancel.cancelled() => {
                    tracing::debug!("Interrupting running statement");
                    interrupt.interrupt();
                }
            }
        });
        Some(armed.drop_guard())
    }

    fn release(self) -> Result<()> {
        // A connection must not go back to the pool inside a transaction.
        if !self.conn.is_autocommit() {
            tracing::warn!("Connection released inside a transaction, rolling back");
            self.conn
                .execute_batch("ROLLBACK")
                .map_err(|e| Error::resource("release", e))?;
        }
        Ok(())
    }
}

/// A prepared statement on a pooled connection.
pub struct SqliteOperation<'c> {
    stmt: rusqlite::Statement<'c>,
}

impl PreparedOperation for SqliteOperation<'_> {
    type Cursor<'s> = SqliteCursor<'s> where Self: 's;

    fn parameter_count(&self) -> usize {
        self.stmt.parameter_count()
    }

    fn parameter_index(&self, name: &str) -> Result<Option<usize>> {
        let found = self
            .stmt
            .parameter_index(name)
            .map_err(|e| Error::binding(e.to_string()))?;
        if found.is_some() || name.starts_with([':', '@', '$', '?']) {
            return Ok(found);
        }
        self.stmt
            .parameter_index(&format!(":{name}"))
            .map_err(|e| Error::binding(e.to_string()))
    }

    fn bind(&mut self, index: usize, value: &Value) -> Result<()> {
        self.stmt
            .raw_bind_parameter(index, value)
            .map_err(|e| Error::binding(e.to_string()))
    }

    fn query(&mut self) -> Result<SqliteCursor<'_>> {
        let columns: Arc<[String]> = self
            .stmt
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();
        Ok(SqliteCursor {
            rows: self.stmt.raw_query(),
            columns,
        })
    }

    fn execute(&mut self) -> Result<u64> {
        let changed = self
            .stmt
            .raw_execute()
            .map_err(|e| Error::resource("execute", e))?;
        Ok(changed as u64)
    }

    fn release(self) -> Result<()> {
        self.stmt
            .finalize()
            .map_err(|e| Error::resource("release", e))
    }
}

/// Forward-only cursor over a statement's rows.
pub struct SqliteCursor<'s> {
    rows: rusqlite::Rows<'s>,
    columns: Arc<[String]>,
}

impl Cursor for SqliteCursor<'_> {
    fn advance(&mut self) -> Result<Option<Record>> {
        let Some(row) = self.rows.next().map_err(|e| Error::resource("advance", e))? else {
            return Ok(None);
        };
        let values = (0..self.columns.len())
            .map(|i| {
                row.get_ref(i)
                    .map(value_from_ref)
                    .map_err(|e| Error::resource("advance", e))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Record::new(self.columns.clone(), values)))
    }

    fn release(self) -> Result<()> {
        // Dropping the rows resets the statement.
        drop(self.rows);
        Ok(())
    }
}

pub(crate) fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Self::Null => ValueRef::Null,
            Self::Integer(v) => ValueRef::Integer(*v),
            Self::Real(v) => ValueRef::Real(*v),
            Self::Text(s) => ValueRef::Text(s.as_bytes()),
            Self::Blob(b) => ValueRef::Blob(b),
        }))
    }
}
