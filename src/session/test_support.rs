//! In-memory session delegate for unit tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{Entity, LockOptions, SessionDelegate};
use crate::backend::Record;
use crate::error::{Error, Result};
use crate::statement::{FromValue, Value};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Note {
    pub id: Option<i64>,
    pub body: String,
}

impl Note {
    pub fn new(id: i64, body: &str) -> Self {
        Self {
            id: Some(id),
            body: body.into(),
        }
    }
}

impl Entity for Note {
    const KIND: &'static str = "note";
    type Id = i64;

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn columns() -> &'static [&'static str] {
        &["body"]
    }

    fn values(&self) -> Vec<Value> {
        vec![Value::from(self.body.as_str())]
    }

    fn from_record(record: &Record) -> Result<Self> {
        Ok(Self {
            id: Some(record.get_as("id")?),
            body: record.get_as("body")?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Counter {
    Begin,
    Commit,
    Rollback,
    Get,
    Mutation,
    Close,
}

#[derive(Debug, Default)]
pub(crate) struct Counters([AtomicUsize; 6]);

impl Counters {
    pub fn get(&self, counter: Counter) -> usize {
        self.0[counter as usize].load(Ordering::SeqCst)
    }

    fn bump(&self, counter: Counter) {
        self.0[counter as usize].fetch_add(1, Ordering::SeqCst);
    }
}

type Rows = BTreeMap<(&'static str, String), Vec<Value>>;

/// Delegate over a map, with snapshot-based transactions.
#[derive(Default)]
pub(crate) struct MemoryDelegate {
    rows: Rows,
    snapshot: Option<Rows>,
    counters: Arc<Counters>,
    last_lock: Option<LockOptions>,
    fail_commit: bool,
    closed: bool,
    next_id: i64,
}

impl MemoryDelegate {
    pub fn failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Self::default()
        }
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    pub fn count(&self, counter: Counter) -> usize {
        self.counters.get(counter)
    }

    pub fn mutations(&self) -> usize {
        self.count(Counter::Mutation)
    }

    pub fn last_lock(&self) -> Option<LockOptions> {
        self.last_lock
    }

    fn key<E: Entity>(id: &E::Id) -> (&'static str, String) {
        (E::KIND, id.to_string())
    }

    fn record<E: Entity>(id: &E::Id, values: &[Value]) -> Record {
        let columns = std::iter::once(E::ID_COLUMN)
            .chain(E::columns().iter().copied())
            .map(str::to_owned)
            .collect();
        let values = std::iter::once(id.clone().into())
            .chain(values.iter().cloned())
            .collect();
        Record::new(columns, values)
    }

    fn put<E: Entity>(&mut self, entity: &E) -> Result<E::Id> {
        self.counters.bump(Counter::Mutation);
        let id = match entity.id() {
            Some(id) => id,
            None => {
                self.next_id += 1;
                E::Id::from_value(&Value::Integer(self.next_id))?
            }
        };
        self.rows.insert(Self::key::<E>(&id), entity.values());
        Ok(id)
    }
}

impl SessionDelegate for MemoryDelegate {
    fn begin(&mut self) -> Result<()> {
        self.counters.bump(Counter::Begin);
        self.snapshot = Some(self.rows.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.counters.bump(Counter::Commit);
        if self.fail_commit {
            return Err(Error::resource("commit", "database is locked"));
        }
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.counters.bump(Counter::Rollback);
        if let Some(rows) = self.snapshot.take() {
            self.rows = rows;
        }
        Ok(())
    }

    fn get<E: Entity>(&mut self, id: &E::Id, lock: &LockOptions) -> Result<Option<E>> {
        self.counters.bump(Counter::Get);
        self.last_lock = Some(*lock);
        self.rows
            .get(&Self::key::<E>(id))
            .map(|values| E::from_record(&Self::record::<E>(id, values)))
            .transpose()
    }

    fn save<E: Entity>(&mut self, entity: &E) -> Result<E::Id> {
        self.put(entity)
    }

    fn persist<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.put(entity).map(drop)
    }

    fn update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.counters.bump(Counter::Mutation);
        let id = entity.id().ok_or_else(|| Error::resource("update", "no identifier"))?;
        match self.rows.get_mut(&Self::key::<E>(&id)) {
            Some(values) => {
                *values = entity.values();
                Ok(())
            }
            None => Err(Error::EntityNotFound {
                entity: E::KIND,
                id: id.to_string(),
            }),
        }
    }

    fn merge<E: Entity>(&mut self, entity: &E) -> Result<E> {
        let id = self.put(entity)?;
        E::from_record(&Self::record::<E>(&id, &entity.values()))
    }

    fn save_or_update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.put(entity).map(drop)
    }

    fn delete<E: Entity>(&mut self, id: &E::Id) -> Result<()> {
        self.counters.bump(Counter::Mutation);
        match self.rows.remove(&Self::key::<E>(id)) {
            Some(_) => Ok(()),
            None => Err(Error::EntityNotFound {
                entity: E::KIND,
                id: id.to_string(),
            }),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.counters.bump(Counter::Close);
        if self.closed {
            return Err(Error::resource("close", "session already closed"));
        }
        self.closed = true;
        Ok(())
    }
}
