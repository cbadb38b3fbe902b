//! Owned and borrowed session scopes.

use std::fmt;
use uuid::Uuid;

use super::lookup::EntitiesById;
use super::statement;
use super::transaction::TransactionScope;
use super::{Entity, Loader, LockOptions, SessionDelegate, StatementDelegate};
use crate::backend::Record;
use crate::error::{Error, Result};
use crate::exec::RowWindow;
use crate::statement::StatementTemplate;

/// Operations common to every session, owned or borrowed.
///
/// Code that only needs to work with a session, not end it, should be
/// generic over this trait so it accepts both [`SessionScope`] and
/// [`CurrentSession`].
pub trait Session: Loader {
    type Delegate: SessionDelegate;

    fn is_open(&self) -> bool;

    /// The underlying delegate, or an illegal-state error once released.
    fn delegate_mut(&mut self) -> Result<&mut Self::Delegate>;

    /// Begin a transaction. The session is borrowed until it ends.
    fn open_transaction(&mut self) -> Result<TransactionScope<'_, Self::Delegate>> {
        TransactionScope::begin(self.delegate_mut()?)
    }

    /// Load an entity outside of any transaction.
    fn get<E: Entity>(&mut self, id: &E::Id) -> Result<Option<E>> {
        self.delegate_mut()?.get::<E>(id, &LockOptions::NONE)
    }

    /// Eager, absent-tolerant lookup access for `E`.
    fn by_id<E: Entity>(&self) -> EntitiesById<E> {
        EntitiesById::eager()
    }

    /// Every row of `template`, read on the session's connection.
    fn query(&mut self, template: &StatementTemplate) -> Result<Vec<Record>>
    where
        Self::Delegate: StatementDelegate,
    {
        self.query_window(template, RowWindow::ALL)
    }

    /// The rows of `template` inside `window`.
    fn query_window(&mut self, template: &StatementTemplate, window: RowWindow) -> Result<Vec<Record>>
    where
        Self::Delegate: StatementDelegate,
    {
        statement::query(self.delegate_mut()?, template, window)
    }

    /// The only row of `template`, if any.
    ///
    /// # Errors
    ///
    /// Fails with an illegal-state error when the query yields more than one
    /// row.
    fn query_unique(&mut self, template: &StatementTemplate) -> Result<Option<Record>>
    where
        Self::Delegate: StatementDelegate,
    {
        statement::query_unique(self.delegate_mut()?, template)
    }

    /// Execute `template` as a mutation, returning the rows affected.
    fn execute(&mut self, template: &StatementTemplate) -> Result<u64>
    where
        Self::Delegate: StatementDelegate,
    {
        statement::execute(self.delegate_mut()?, template)
    }
}

/// A session this scope owns and must release.
pub struct SessionScope<D: SessionDelegate> {
    id: Uuid,
    delegate: D,
    open: bool,
}

impl<D: SessionDelegate> SessionScope<D> {
    pub fn new(delegate: D) -> Self {
        let id = Uuid::now_v7();
        tracing::trace!(session = %id, "Session opened");
        Self {
            id,
            delegate,
            open: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn delegate(&self) -> &D {
        &self.delegate
    }

    /// Close the underlying session.
    ///
    /// Calling this twice is not idempotent: the second call reaches the
    /// store again and returns whatever error it reports.
    pub fn release(&mut self) -> Result<()> {
        self.open = false;
        tracing::trace!(session = %self.id, "Session released");
        self.delegate.close()
    }

    /// Lend this session to code that must not end it.
    pub fn as_current(&mut self) -> Result<CurrentSession<'_, D>> {
        Ok(CurrentSession::new(self.delegate_mut()?))
    }
}

impl<D: SessionDelegate> Session for SessionScope<D> {
    type Delegate = D;

    fn is_open(&self) -> bool {
        self.open
    }

    fn delegate_mut(&mut self) -> Result<&mut D> {
        if !self.open {
            return Err(Error::illegal_state("session already released"));
        }
        Ok(&mut self.delegate)
    }
}

impl<D: SessionDelegate> Loader for SessionScope<D> {
    fn load_by_id<E: Entity>(&mut self, id: &E::Id, lock: &LockOptions) -> Result<Option<E>> {
        self.delegate_mut()?.get::<E>(id, lock)
    }
}

impl<D: SessionDelegate> Drop for SessionScope<D> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.release() {
                tracing::error!(session = %self.id, error = %e, "Failed to release session");
            }
        }
    }
}

impl<D: SessionDelegate> fmt::Debug for SessionScope<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionScope")
            .field("id", &self.id)
            .field("open", &self.open)
            .finish()
    }
}

/// A session whose lifecycle is owned elsewhere.
///
/// Supports every [`Session`] operation; there is no way to release it.
pub struct CurrentSession<'s, D: SessionDelegate> {
    delegate: &'s mut D,
}

impl<'s, D: SessionDelegate> CurrentSession<'s, D> {
    pub fn new(delegate: &'s mut D) -> Self {
        Self { delegate }
    }
}

impl<D: SessionDelegate> Session for CurrentSession<'_, D> {
    type Delegate = D;

    fn is_open(&self) -> bool {
        true
    }

    fn delegate_mut(&mut self) -> Result<&mut D> {
        Ok(&mut *self.delegate)
    }
}

impl<D: SessionDelegate> Loader for CurrentSession<'_, D> {
    fn load_by_id<E: Entity>(&mut self, id: &E::Id, lock: &LockOptions) -> Result<Option<E>> {
        self.delegate.get::<E>(id, lock)
    }
}

impl<D: SessionDelegate> fmt::Debug for CurrentSession<'_, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentSession").finish_non_exhaustive()
    }
}
