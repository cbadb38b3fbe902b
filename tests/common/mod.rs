//! Test utilities for crudstream tests.
//!
//! Provides:
//! - A scripted, event-recording fake store implementing the backend traits
//! - A recording observer sharing the store's event log
//! - Temporary SQLite database fixtures

#![allow(dead_code)]

use crudstream::backend::{Connection, ConnectionProvider, Cursor, PreparedOperation, Record};
use crudstream::exec::Observer;
use crudstream::observability::tracing::init_test_tracing;
use crudstream::session::{LockOptions, SessionDelegate};
use crudstream::{Entity, Error, Result, Store, StoreConfig, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Something the fake store or a recording observer saw.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquired,
    Prepared(String),
    Bound(usize, Value),
    Queried,
    Executed,
    Advanced(usize),
    CursorReleased,
    OperationReleased,
    ConnectionReleased,
    Next,
    Error(String),
    Completed,
}

impl Event {
    pub fn is_signal(&self) -> bool {
        matches!(self, Self::Next | Self::Error(_) | Self::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Completed)
    }
}

/// Shared, ordered event log.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|e| *e == wanted).count()
    }

    pub fn position(&self, wanted: &Event) -> Option<usize> {
        self.events().iter().position(|e| e == wanted)
    }

    pub fn terminal_signals(&self) -> usize {
        self.events().iter().filter(|e| e.is_terminal()).count()
    }

    /// Every acquired resource was released exactly once.
    pub fn fully_released(&self) -> bool {
        let events = self.events();
        let count = |e: &Event| events.iter().filter(|x| *x == e).count();
        count(&Event::Acquired) == count(&Event::ConnectionReleased)
            && events.iter().filter(|e| matches!(e, Event::Prepared(_))).count()
                == count(&Event::OperationReleased)
            && count(&Event::Queried) == count(&Event::CursorReleased)
    }
}

/// What the fake store does when driven.
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// 1-based row whose advance fails.
    pub fail_at_row: Option<usize>,
    pub rows_affected: u64,
    pub parameter_count: usize,
    pub parameter_names: Vec<String>,
    pub fail_acquire: bool,
    pub fail_cursor_release: bool,
    pub fail_operation_release: bool,
    pub advance_delay: Option<Duration>,
}

impl Script {
    /// Rows with a single `n` column holding 1..=count.
    pub fn numbered(count: i64) -> Self {
        Self {
            columns: vec!["n".into()],
            rows: (1..=count).map(|n| vec![Value::Integer(n)]).collect(),
            ..Self::default()
        }
    }
}

/// Scripted connection provider recording every call.
pub struct FakeStore {
    script: Script,
    log: EventLog,
    acquired: AtomicUsize,
}

impl FakeStore {
    pub fn new(script: Script) -> Arc<Self> {
        Self::with_log(script, EventLog::default())
    }

    pub fn with_log(script: Script, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            script,
            log,
            acquired: AtomicUsize::new(0),
        })
    }

    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

impl ConnectionProvider for FakeStore {
    type Connection = FakeConnection;

    fn acquire(&self) -> Result<FakeConnection> {
        if self.script.fail_acquire {
            return Err(Error::resource("acquire", "connection refused"));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.log.push(Event::Acquired);
        Ok(FakeConnection {
            script: self.script.clone(),
            log: self.log.clone(),
        })
    }
}

pub struct FakeConnection {
    script: Script,
    log: EventLog,
}

impl Connection for FakeConnection {
    type Operation<'c> = FakeOperation<'c> where Self: 'c;

    fn prepare(&mut self, text: &str) -> Result<FakeOperation<'_>> {
        self.log.push(Event::Prepared(text.to_string()));
        Ok(FakeOperation {
            script: &self.script,
            log: &self.log,
        })
    }

    fn release(self) -> Result<()> {
        self.log.push(Event::ConnectionReleased);
        Ok(())
    }
}

pub struct FakeOperation<'c> {
    script: &'c Script,
    log: &'c EventLog,
}

impl PreparedOperation for FakeOperation<'_> {
    type Cursor<'s> = FakeCursor<'s> where Self: 's;

    fn parameter_count(&self) -> usize {
        self.script.parameter_count
    }

    fn parameter_index(&self, name: &str) -> Result<Option<usize>> {
        Ok(self
            .script
            .parameter_names
            .iter()
            .position(|n| n == name)
            .map(|i| i + 1))
    }

    fn bind(&mut self, index: usize, value: &Value) -> Result<()> {
        self.log.push(Event::Bound(index, value.clone()));
        Ok(())
    }

    fn query(&mut self) -> Result<FakeCursor<'_>> {
        self.log.push(Event::Queried);
        Ok(FakeCursor {
            script: self.script,
            log: self.log,
            columns: self.script.columns.iter().cloned().collect(),
            position: 0,
        })
    }

    fn execute(&mut self) -> Result<u64> {
        self.log.push(Event::Executed);
        Ok(self.script.rows_affected)
    }

    fn release(self) -> Result<()> {
        self.log.push(Event::OperationReleased);
        if self.script.fail_operation_release {
            return Err(Error::resource("release", "statement finalize failed"));
        }
        Ok(())
    }
}

pub struct FakeCursor<'s> {
    script: &'s Script,
    log: &'s EventLog,
    columns: Arc<[String]>,
    position: usize,
}

impl Cursor for FakeCursor<'_> {
    fn advance(&mut self) -> Result<Option<Record>> {
        if let Some(delay) = self.script.advance_delay {
            std::thread::sleep(delay);
        }
        let row = self.position + 1;
        if self.script.fail_at_row == Some(row) {
            return Err(Error::resource("advance", format!("disk I/O error at row {row}")));
        }
        let Some(values) = self.script.rows.get(self.position) else {
            return Ok(None);
        };
        self.position = row;
        self.log.push(Event::Advanced(row));
        Ok(Some(Record::new(self.columns.clone(), values.clone())))
    }

    fn release(self) -> Result<()> {
        self.log.push(Event::CursorReleased);
        if self.script.fail_cursor_release {
            return Err(Error::resource("release", "cursor close failed"));
        }
        Ok(())
    }
}

/// Observer writing signals into an event log, optionally cancelling a
/// token after a number of items.
pub struct RecordingObserver<T> {
    log: EventLog,
    pub items: Vec<T>,
    pub error: Option<Error>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl<T> RecordingObserver<T> {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            items: Vec::new(),
            error: None,
            cancel_after: None,
        }
    }

    pub fn cancelling_after(log: EventLog, count: usize, token: CancellationToken) -> Self {
        Self {
            cancel_after: Some((count, token)),
            ..Self::new(log)
        }
    }
}

impl<T> Observer<T> for RecordingObserver<T> {
    fn on_next(&mut self, item: T) {
        self.log.push(Event::Next);
        self.items.push(item);
        if let Some((count, token)) = &self.cancel_after {
            if self.items.len() >= *count {
                token.cancel();
            }
        }
    }

    fn on_error(&mut self, error: Error) {
        self.log.push(Event::Error(error.to_string()));
        self.error = Some(error);
    }

    fn on_completed(&mut self) {
        self.log.push(Event::Completed);
    }
}

/// A stored test entity mapped to the `widget` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: Option<i64>,
    pub name: String,
    pub weight: f64,
}

impl Widget {
    pub fn new(id: i64, name: &str, weight: f64) -> Self {
        Self {
            id: Some(id),
            name: name.to_string(),
            weight,
        }
    }
}

impl Entity for Widget {
    const KIND: &'static str = "widget";
    type Id = i64;

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn columns() -> &'static [&'static str] {
        &["name", "weight"]
    }

    fn values(&self) -> Vec<Value> {
        vec![self.name.as_str().into(), self.weight.into()]
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: Some(record.get_as("id")?),
            name: record.get_as("name")?,
            weight: record.get_as("weight")?,
        })
    }
}

pub const WIDGET_SCHEMA: &str =
    "CREATE TABLE widget (id INTEGER PRIMARY KEY, name TEXT NOT NULL, weight REAL NOT NULL);";

/// Session delegate that records every call by name.
///
/// Entities are kept in memory keyed by kind and identifier; there is no
/// transactional isolation.
#[derive(Clone, Default)]
pub struct CountingDelegate {
    calls: Arc<Mutex<Vec<&'static str>>>,
    rows: Arc<Mutex<HashMap<(&'static str, String), Vec<Value>>>>,
    closed: Arc<Mutex<bool>>,
}

impl CountingDelegate {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| **c == name).count()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }

    fn put<E: Entity>(&self, id: &E::Id, entity: &E) {
        self.rows
            .lock()
            .unwrap()
            .insert((E::KIND, id.to_string()), entity.values());
    }
}

impl SessionDelegate for CountingDelegate {
    fn begin(&mut self) -> Result<()> {
        self.record("begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.record("commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.record("rollback");
        Ok(())
    }

    fn get<E: Entity>(&mut self, id: &E::Id, _lock: &LockOptions) -> Result<Option<E>> {
        self.record("get");
        let rows = self.rows.lock().unwrap();
        let Some(values) = rows.get(&(E::KIND, id.to_string())) else {
            return Ok(None);
        };
        let columns = std::iter::once(E::ID_COLUMN)
            .chain(E::columns().iter().copied())
            .map(str::to_owned)
            .collect();
        let mut all = vec![id.clone().into()];
        all.extend(values.iter().cloned());
        E::from_record(&Record::new(columns, all)).map(Some)
    }

    fn save<E: Entity>(&mut self, entity: &E) -> Result<E::Id> {
        self.record("save");
        let id = entity
            .id()
            .ok_or_else(|| Error::resource("save", "identifier required"))?;
        self.put(&id, entity);
        Ok(id)
    }

    fn persist<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.record("persist");
        if let Some(id) = entity.id() {
            self.put(&id, entity);
        }
        Ok(())
    }

    fn update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.record("update");
        if let Some(id) = entity.id() {
            self.put(&id, entity);
        }
        Ok(())
    }

    fn merge<E: Entity>(&mut self, entity: &E) -> Result<E> {
        self.record("merge");
        let id = entity
            .id()
            .ok_or_else(|| Error::resource("merge", "identifier required"))?;
        self.put(&id, entity);
        self.get::<E>(&id, &LockOptions::NONE)?
            .ok_or_else(|| Error::resource("merge", "vanished"))
    }

    fn save_or_update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.record("save_or_update");
        if let Some(id) = entity.id() {
            self.put(&id, entity);
        }
        Ok(())
    }

    fn delete<E: Entity>(&mut self, id: &E::Id) -> Result<()> {
        self.record("delete");
        self.rows.lock().unwrap().remove(&(E::KIND, id.to_string()));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.record("close");
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return Err(Error::resource("close", "session is closed"));
        }
        *closed = true;
        Ok(())
    }
}

/// Test fixture that manages a temporary database directory.
///
/// The directory is automatically cleaned up when the fixture is dropped.
pub struct TestFixture {
    /// Temporary directory for test database
    pub temp_dir: TempDir,
    /// Path to the database file
    pub db_path: PathBuf,
}

impl TestFixture {
    /// Create a new test fixture with a temporary database directory.
    pub fn new() -> Self {
        init_test_tracing();
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        Self { temp_dir, db_path }
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::test_config(&self.db_path)
    }

    /// Open a store and apply `schema` through a raw pooled connection.
    pub fn store(&self, schema: &str) -> Store {
        let store = Store::open(self.config()).expect("failed to open store");
        store
            .pool()
            .get()
            .expect("failed to get connection")
            .execute_batch(schema)
            .expect("failed to apply schema");
        store
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
