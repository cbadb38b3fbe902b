//! Transaction scope with a rollback safety net.

use std::fmt;
use uuid::Uuid;

use super::lookup::Reference;
use super::statement;
use super::{Entity, Loader, LockOptions, SessionDelegate, StatementDelegate};
use crate::backend::Record;
use crate::error::{Error, Result};
use crate::exec::RowWindow;
use crate::observability::metrics::record_implicit_rollback;
use crate::statement::StatementTemplate;

/// Transaction lifecycle. `Committed` and `RolledBack` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        })
    }
}

/// One begin/commit/rollback unit on a session.
///
/// Every primitive checks that the transaction is still open before it
/// touches the store. Dropping an open transaction rolls it back.
pub struct TransactionScope<'s, D: SessionDelegate> {
    id: Uuid,
    delegate: &'s mut D,
    state: TxState,
}

impl<'s, D: SessionDelegate> TransactionScope<'s, D> {
    /// Begin a transaction on `delegate`.
    pub(crate) fn begin(delegate: &'s mut D) -> Result<Self> {
        delegate.begin()?;
        let id = Uuid::now_v7();
        tracing::trace!(transaction = %id, "Transaction opened");
        Ok(Self {
            id,
            delegate,
            state: TxState::Open,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TxState::Open
    }

    pub fn was_committed(&self) -> bool {
        self.state == TxState::Committed
    }

    pub fn was_rolled_back(&self) -> bool {
        self.state == TxState::RolledBack
    }

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Fails with an illegal-state error if the transaction has already
    /// ended. If the store rejects the commit the transaction stays open and
    /// is rolled back when released.
    pub fn commit(&mut self) -> Result<()> {
        self.check_open()?;
        self.delegate.commit()?;
        self.state = TxState::Committed;
        tracing::trace!(transaction = %self.id, "Transaction committed");
        Ok(())
    }

    /// Roll the transaction back.
    pub fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        self.delegate.rollback()?;
        self.state = TxState::RolledBack;
        tracing::trace!(transaction = %self.id, "Transaction rolled back");
        Ok(())
    }

    /// Release the transaction, rolling it back if no decision was made.
    ///
    /// Equivalent to dropping it, except that a failing implicit rollback
    /// is returned instead of logged.
    pub fn release(mut self) -> Result<()> {
        self.rollback_if_open()
    }

    /// Load an entity without locking.
    pub fn get<E: Entity>(&mut self, id: &E::Id) -> Result<Option<E>> {
        self.get_locked(id, &LockOptions::NONE)
    }

    /// Load an entity with the given lock options.
    pub fn get_locked<E: Entity>(&mut self, id: &E::Id, lock: &LockOptions) -> Result<Option<E>> {
        self.check_open()?;
        self.delegate.get::<E>(id, lock)
    }

    /// A reference to an entity assumed to exist. No store round-trip.
    pub fn load<E: Entity>(&self, id: E::Id) -> Result<Reference<E>> {
        self.check_open()?;
        Ok(Reference::new(id, LockOptions::NONE))
    }

    pub fn save<E: Entity>(&mut self, entity: &E) -> Result<E::Id> {
        self.check_open()?;
        self.delegate.save(entity)
    }

    pub fn persist<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.check_open()?;
        self.delegate.persist(entity)
    }

    pub fn update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.check_open()?;
        self.delegate.update(entity)
    }

    pub fn merge<E: Entity>(&mut self, entity: &E) -> Result<E> {
        self.check_open()?;
        self.delegate.merge(entity)
    }

    pub fn save_or_update<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.check_open()?;
        self.delegate.save_or_update(entity)
    }

    /// Delete a stored entity.
    ///
    /// # Errors
    ///
    /// Fails with an illegal-state error if the transaction has ended, or if
    /// the entity has never been saved.
    pub fn delete<E: Entity>(&mut self, entity: &E) -> Result<()> {
        self.check_open()?;
        let id = entity
            .id()
            .ok_or_else(|| Error::illegal_state(format!("cannot delete unsaved {}", E::KIND)))?;
        self.delegate.delete::<E>(&id)
    }

    /// Delete the entity a reference points to, without loading it first.
    pub fn delete_reference<E: Entity>(&mut self, reference: &Reference<E>) -> Result<()> {
        self.check_open()?;
        self.delegate.delete::<E>(reference.id())
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            TxState::Open => Ok(()),
            state => Err(Error::illegal_state(format!(
                "transaction already {state}"
            ))),
        }
    }

    fn rollback_if_open(&mut self) -> Result<()> {
        if self.state != TxState::Open {
            return Ok(());
        }
        tracing::warn!(transaction = %self.id, "Transaction released without commit or rollback, rolling back");
        record_implicit_rollback();
        // Terminal even if the rollback fails, so it is attempted once.
        self.state = TxState::RolledBack;
        self.delegate.rollback()
    }
}

/// Raw statements, run inside this transaction.
impl<D: StatementDelegate> TransactionScope<'_, D> {
    /// Every row of `template`, including this transaction's own
    /// uncommitted writes.
    pub fn query(&mut self, template: &StatementTemplate) -> Result<Vec<Record>> {
        self.query_window(template, RowWindow::ALL)
    }

    pub fn query_window(&mut self, template: &StatementTemplate, window: RowWindow) -> Result<Vec<Record>> {
        self.check_open()?;
        statement::query(&mut *self.delegate, template, window)
    }

    /// The only row of `template`, if any. More than one row is an
    /// illegal-state error.
    pub fn query_unique(&mut self, template: &StatementTemplate) -> Result<Option<Record>> {
        self.check_open()?;
        statement::query_unique(&mut *self.delegate, template)
    }

    /// Execute `template` as a mutation, returning the rows affected.
    pub fn execute(&mut self, template: &StatementTemplate) -> Result<u64> {
        self.check_open()?;
        statement::execute(&mut *self.delegate, template)
    }
}

impl<D: SessionDelegate> Loader for TransactionScope<'_, D> {
    fn load_by_id<E: Entity>(&mut self, id: &E::Id, lock: &LockOptions) -> Result<Option<E>> {
        self.get_locked(id, lock)
    }
}

impl<D: SessionDelegate> Drop for TransactionScope<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.rollback_if_open() {
            tracing::error!(transaction = %self.id, error = %e, "Implicit rollback failed");
        }
    }
}

impl<D: SessionDelegate> fmt::Debug for TransactionScope<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionScope")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish()
    }
}
