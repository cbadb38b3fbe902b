//! Session delegate over one pooled SQLite connection.
//!
//! Statements are generated from the [`Entity`] mapping: one table per
//! kind, keyed by the identifier column. Statements are cached per
//! connection.

use rusqlite::{params_from_iter, OptionalExtension};

use super::pool::{value_from_ref, SqliteConnection, SqlitePool};
use crate::backend::Record;
use crate::error::{Error, Result};
use crate::session::{Entity, LockMode, LockOptions, SessionDelegate, SessionFactory, StatementDelegate};
use crate::statement::{FromValue, Value};

/// Opens [`SqliteSession`]s from a pool.
#[derive(Clone)]
pub struct SqliteSessionFactory {
    pool: SqlitePool,
}

impl SqliteSessionFactory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl SessionFactory for SqliteSessionFactory {
    type Delegate = SqliteSession;

    fn open(&self) -> Result<SqliteSession> {
        Ok(SqliteSession {
            conn: Some(SqliteConnection::new(self.pool.get()?)),
        })
    }
}

/// A session holding one pooled connection until closed.
///
/// Raw statements issued through the session run on the same connection,
/// inside whatever transaction is open on it.
pub struct SqliteSession {
    conn: Option<SqliteConnection>,
}

impl SqliteSession {
    fn conn(&self, action: &'static str) -> Result<&rusqlite::Connection> {
        self.conn
            .as_ref()
            .map(SqliteConnection::raw)
            .ok_or_else(|| Error::resource(action, "session already closed"))
    }

    fn batch(&self, action: &'static str, sql: &str) -> Result<()> {
        self.conn(action)?
            .execute_batch(sql)
            .map_err(|e| Error::resource(action, e))
    }

    fn execute(&self, action: &'static str, sql: &str, values: &[Value]) -> Result<usize> {
        let conn = self.conn(action)?;
        let mut stmt = conn.prepare_cached(sql).map_err(|e| Error::resource(action, e))?;
        stmt.execute(params_from_iter(values.iter()))
            .map_err(|e| Error::resource(action, e))
    }

    fn insert<E: Entity>(&self, action: &'static str, entity: &E) -> Result<E::Id> {
        let conn = self.conn(action)?;
        match entity.id() {
            Some(id) => {
                let values = with_id(&id, entity.values());
                self.execute(action, &insert_sql::<E>(true), &values)?;
                Ok(id)
            }
            None => {
                self.execute(action, &insert_sql::<E>(false), &entity.values())?;
                E::Id::from_value(&Value::Integer(conn.last_insert_rowid()))
            }
        }
    }

    fn upsert<E: Entity>(&self, id: &E::Id, entity: &E) -> Result<()> {
        let values = with_id(id, entity.values());
        self.execute("save_or_update", &upsert_sql::<E>(), &values)
            .map(drop)
    }

    fn missing<E: Entity>(id: &E::Id) -> Error {
        Error::EntityNotFound {
            entity: E::KIND,
            id: id.to_string(),
        }
    }
}

impl SessionDelegate for SqliteSession {
    fn begin(&mut self) -> Result<()> {
        self.batch("begin", "BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.batch("commit", "COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.batch("rollback", "ROLLBACK")
    }

    fn get<E: Entity>(&mut self, id: &E::Id, lock: &LockOptions) -> Result<Option<E>> {
        if lock.mode != LockMode::None {
            // SQLite locks the whole database on write; row locks are a no-op.
            tracing::trace!(entity = E::KIND, mode = ?lock.mode, "Row lock not applied");
        }
        let conn = self.conn("load")?;
        let mut stmt = conn
            .prepare_cached(&select_sql::<E>())
            .map_err(|e| Error::resource("load", e))?;
        let columns: std::sync::Arc<[String]> =
            stmt.column_names().into_iter().map(str::to_owned).collect();
        let key: Value = id.clone().into();
        let record = stmt
            .query_row([&key], |row| {
                (0..columns.len())
                    .map(|i| row.get_ref(i).map(value_from_ref))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .optional()
            .map_err(|e| Error::resource("load", e))?;
        record
            .map(|values| E::from_record(&Record::new(columns, values)))
            .transpose()
    }

    fn save<E: Entity>(&mut self, entity: &E) -> Result<E::Id> {
        self.insert("save", entity)
    }

    fn persist<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.insert("persist", entity).map(drop)
    }

    fn update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        let id = entity
            .id()
            .ok_or_else(|| Error::resource("update", format!("unsaved {} has no identifier", E::KIND)))?;
        let mut values = entity.values();
        values.push(id.clone().into());
        match self.execute("update", &update_sql::<E>(), &values)? {
            0 => Err(Self::missing::<E>(&id)),
            _ => Ok(()),
        }
    }

    fn merge<E: Entity>(&mut self, entity: &E) -> Result<E> {
        let id = match entity.id() {
            Some(id) => {
                self.upsert(&id, entity)?;
                id
            }
            None => self.insert("merge", entity)?,
        };
        self.get::<E>(&id, &LockOptions::NONE)?
            .ok_or_else(|| Self::missing::<E>(&id))
    }

    fn save_or_update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        match entity.id() {
            Some(id) => self.upsert(&id, entity),
            None => self.insert("save_or_update", entity).map(drop),
        }
    }

    fn delete<E: Entity>(&mut self, id: &E::Id) -> Result<()> {
        let key: Value = id.clone().into();
        match self.execute("delete", &delete_sql::<E>(), &[key])? {
            0 => Err(Self::missing::<E>(id)),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| Error::resource("close", "session already closed"))?;
        let conn = conn.raw();
        if !conn.is_autocommit() {
            tracing::warn!("Session closed inside a transaction, rolling back");
            conn.execute_batch("ROLLBACK")
                .map_err(|e| Error::resource("close", e))?;
        }
        Ok(())
    }
}

impl StatementDelegate for SqliteSession {
    type Connection = SqliteConnection;

    fn connection(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::resource("statement", "session already closed"))
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn with_id<I: Into<Value> + Clone>(id: &I, values: Vec<Value>) -> Vec<Value> {
    let mut all = Vec::with_capacity(values.len() + 1);
    all.push(id.clone().into());
    all.extend(values);
    all
}

fn placeholders(from: usize, count: usize) -> String {
    (from..from + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_list<E: Entity>(include_id: bool) -> Vec<String> {
    include_id
        .then_some(E::ID_COLUMN)
        .into_iter()
        .chain(E::columns().iter().copied())
        .map(quote)
        .collect()
}

fn select_sql<E: Entity>() -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?1",
        column_list::<E>(true).join(", "),
        quote(E::KIND),
        quote(E::ID_COLUMN)
    )
}

fn insert_sql<E: Entity>(include_id: bool) -> String {
    let columns = column_list::<E>(include_id);
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote(E::KIND));
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(E::KIND),
        columns.join(", "),
        placeholders(1, columns.len())
    )
}

fn upsert_sql<E: Entity>() -> String {
    let updates = E::columns()
        .iter()
        .map(|c| format!("{0} = excluded.{0}", quote(c)))
        .collect::<Vec<_>>();
    let action = if updates.is_empty() {
        "NOTHING".to_string()
    } else {
        format!("UPDATE SET {}", updates.join(", "))
    };
    format!(
        "{} ON CONFLICT({}) DO {action}",
        insert_sql::<E>(true),
        quote(E::ID_COLUMN)
    )
}

fn update_sql<E: Entity>() -> String {
    let assignments = E::columns()
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", quote(c), i + 1))
        .collect::<Vec<_>>();
    format!(
        "UPDATE {} SET {} WHERE {} = ?{}",
        quote(E::KIND),
        assignments.join(", "),
        quote(E::ID_COLUMN),
        assignments.len() + 1
    )
}

fn delete_sql<E: Entity>() -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1",
        quote(E::KIND),
        quote(E::ID_COLUMN)
    )
}
