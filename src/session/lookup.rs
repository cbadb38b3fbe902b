//! Identifier-keyed lookups.
//!
//! Two policies are available per lookup:
//! - [`LookupPolicy::Eager`] loads immediately and reports a missing entity
//!   as [`Lookup::Absent`], never as an error.
//! - [`LookupPolicy::AssumePresent`] skips the round-trip and returns a
//!   [`Reference`]; a missing entity only surfaces when it is resolved.

use std::fmt;
use std::marker::PhantomData;

use super::{Entity, Loader, LockOptions};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupPolicy {
    Eager,
    AssumePresent,
}

/// Lookup access for one entity type under one policy and lock setting.
pub struct EntitiesById<E> {
    policy: LookupPolicy,
    lock: LockOptions,
    entity: PhantomData<fn() -> E>,
}

impl<E: Entity> EntitiesById<E> {
    pub fn new(policy: LookupPolicy) -> Self {
        Self {
            policy,
            lock: LockOptions::NONE,
            entity: PhantomData,
        }
    }

    pub fn eager() -> Self {
        Self::new(LookupPolicy::Eager)
    }

    pub fn assume_present() -> Self {
        Self::new(LookupPolicy::AssumePresent)
    }

    pub fn policy(&self) -> LookupPolicy {
        self.policy
    }

    pub fn lock(&self) -> LockOptions {
        self.lock
    }

    /// Same policy, different lock options.
    pub fn with_lock(&self, lock: LockOptions) -> Self {
        Self {
            policy: self.policy,
            lock,
            entity: PhantomData,
        }
    }

    /// Look up one identifier.
    ///
    /// Under the assume-present policy this never touches `from`.
    pub fn fetch<L: Loader>(&self, from: &mut L, id: E::Id) -> Result<Lookup<E>> {
        match self.policy {
            LookupPolicy::Eager => Ok(match from.load_by_id::<E>(&id, &self.lock)? {
                Some(entity) => Lookup::Loaded(entity),
                None => Lookup::Absent,
            }),
            LookupPolicy::AssumePresent => Ok(Lookup::Deferred(Reference::new(id, self.lock))),
        }
    }

    /// Look up many identifiers, dropping absent ones.
    pub fn fetch_all<L, I>(&self, from: &mut L, ids: I) -> Result<Vec<Lookup<E>>>
    where
        L: Loader,
        I: IntoIterator<Item = E::Id>,
    {
        let mut found = Vec::new();
        for id in ids {
            match self.fetch(from, id)? {
                Lookup::Absent => {}
                lookup => found.push(lookup),
            }
        }
        Ok(found)
    }

    /// A reference to `id` without any store round-trip.
    pub fn reference(&self, id: E::Id) -> Reference<E> {
        Reference::new(id, self.lock)
    }
}

impl<E> Clone for EntitiesById<E> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy,
            lock: self.lock,
            entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for EntitiesById<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitiesById")
            .field("entity", &E::KIND)
            .field("policy", &self.policy)
            .field("lock", &self.lock)
            .finish()
    }
}

/// Outcome of one lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<E: Entity> {
    Loaded(E),
    Absent,
    Deferred(Reference<E>),
}

impl<E: Entity> Lookup<E> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// The loaded entity, if this lookup was eager and found one.
    pub fn loaded(self) -> Option<E> {
        match self {
            Self::Loaded(entity) => Some(entity),
            _ => None,
        }
    }

    /// Materialize the outcome, resolving a deferred reference.
    ///
    /// # Errors
    ///
    /// A deferred reference to a missing entity fails with
    /// [`Error::EntityNotFound`].
    pub fn resolve<L: Loader>(self, from: &mut L) -> Result<Option<E>> {
        match self {
            Self::Loaded(entity) => Ok(Some(entity)),
            Self::Absent => Ok(None),
            Self::Deferred(reference) => reference.resolve(from).map(Some),
        }
    }
}

/// Zero or one loaded entity. Deferred references yield nothing until
/// resolved.
impl<E: Entity> IntoIterator for Lookup<E> {
    type Item = E;
    type IntoIter = std::option::IntoIter<E>;

    fn into_iter(self) -> Self::IntoIter {
        self.loaded().into_iter()
    }
}

/// An entity assumed to exist, loaded only on demand.
pub struct Reference<E: Entity> {
    id: E::Id,
    lock: LockOptions,
}

impl<E: Entity> Reference<E> {
    pub(crate) fn new(id: E::Id, lock: LockOptions) -> Self {
        Self { id, lock }
    }

    pub fn id(&self) -> &E::Id {
        &self.id
    }

    /// Load the referenced entity.
    pub fn resolve<L: Loader>(&self, from: &mut L) -> Result<E> {
        from.load_by_id::<E>(&self.id, &self.lock)?
            .ok_or_else(|| Error::EntityNotFound {
                entity: E::KIND,
                id: self.id.to_string(),
            })
    }
}

impl<E: Entity> Clone for Reference<E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            lock: self.lock,
        }
    }
}

impl<E: Entity> PartialEq for Reference<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.lock == other.lock
    }
}

impl<E: Entity> fmt::Debug for Reference<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference<{}>({})", E::KIND, self.id)
    }
}
