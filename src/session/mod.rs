//! Sessions, transactions and identifier-keyed lookups.
//!
//! A [`SessionScope`] owns one store session for one logical unit of work.
//! It hands out [`TransactionScope`]s one at a time; each transaction
//! borrows the session mutably, so the borrow checker rules out two open
//! transactions on one session.
//!
//! Sessions whose delegate implements [`StatementDelegate`] also run
//! [`StatementTemplate`](crate::StatementTemplate)s on their own connection.
//!
//! Everything here is synchronous: sessions are created, used and released
//! on a single worker thread (see [`Store::with_session`](crate::Store::with_session)).

mod lookup;
mod scope;
mod statement;
mod transaction;

#[cfg(test)]
mod test_support;

pub use lookup::{EntitiesById, Lookup, LookupPolicy, Reference};
pub use scope::{CurrentSession, Session, SessionScope};
pub use transaction::{TransactionScope, TxState};

use std::fmt;
use std::time::Duration;

use crate::backend::{Connection, Record};
use crate::error::Result;
use crate::statement::{FromValue, Value};

/// A persistent type addressable by identifier.
///
/// The mapping is deliberately flat: one kind per table, one identifier
/// column, and an ordered list of value columns.
pub trait Entity: Sized + Send + 'static {
    /// Entity name, used as the table name by SQL stores.
    const KIND: &'static str;

    /// Identifier column name.
    const ID_COLUMN: &'static str = "id";

    type Id: Clone + PartialEq + fmt::Debug + fmt::Display + Into<Value> + FromValue + Send + Sync + 'static;

    /// Identifier of this instance, or `None` if it has not been saved yet.
    fn id(&self) -> Option<Self::Id>;

    /// Value columns, excluding the identifier.
    fn columns() -> &'static [&'static str];

    /// Values for [`columns`](Self::columns), in the same order.
    fn values(&self) -> Vec<Value>;

    /// Rebuild an instance from a row holding the identifier and value
    /// columns.
    fn from_record(record: &Record) -> Result<Self>;
}

/// Row lock requested for a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    #[default]
    None,
    Read,
    Upgrade,
    UpgradeNoWait,
}

/// Locking applied to an identifier lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LockOptions {
    pub mode: LockMode,
    pub timeout: Option<Duration>,
}

impl LockOptions {
    pub const NONE: Self = Self {
        mode: LockMode::None,
        timeout: None,
    };

    pub fn new(mode: LockMode) -> Self {
        Self { mode, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Store-specific session primitives.
///
/// Implementations perform the actual I/O; the scopes in this module only
/// add state checks and lifecycle guarantees on top.
pub trait SessionDelegate {
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    /// Load an entity, or `None` if no entity has the identifier.
    fn get<E: Entity>(&mut self, id: &E::Id, lock: &LockOptions) -> Result<Option<E>>;

    /// Insert an entity, returning its (possibly generated) identifier.
    fn save<E: Entity>(&mut self, entity: &E) -> Result<E::Id>;

    /// Insert an entity without reporting its identifier.
    fn persist<E: Entity>(&mut self, entity: &E) -> Result<()>;

    /// Overwrite an existing entity. Fails if it does not exist.
    fn update<E: Entity>(&mut self, entity: &E) -> Result<()>;

    /// Copy the entity's state onto the stored instance, inserting it if
    /// needed, and return the stored state.
    fn merge<E: Entity>(&mut self, entity: &E) -> Result<E>;

    /// Insert when the entity has no identifier, otherwise upsert.
    fn save_or_update<E: Entity>(&mut self, entity: &E) -> Result<()>;

    /// Remove by identifier. Fails if no entity has the identifier.
    fn delete<E: Entity>(&mut self, id: &E::Id) -> Result<()>;

    /// End the session. Closing twice is an error reported by the store.
    fn close(&mut self) -> Result<()>;
}

/// A session delegate that can run raw statements on the connection it
/// holds.
///
/// Statements issued this way join the transaction open on the session, so
/// reads see its uncommitted writes.
pub trait StatementDelegate: SessionDelegate {
    type Connection: Connection;

    /// The session's connection. Fails once the session is closed.
    fn connection(&mut self) -> Result<&mut Self::Connection>;
}

/// Opens fresh session delegates.
pub trait SessionFactory: Send + Sync + 'static {
    type Delegate: SessionDelegate;

    fn open(&self) -> Result<Self::Delegate>;

    /// Open a scoped session owning a fresh delegate.
    fn open_scope(&self) -> Result<SessionScope<Self::Delegate>> {
        Ok(SessionScope::new(self.open()?))
    }
}

/// Anything that can load entities by identifier: sessions and open
/// transactions.
pub trait Loader {
    fn load_by_id<E: Entity>(&mut self, id: &E::Id, lock: &LockOptions) -> Result<Option<E>>;
}
