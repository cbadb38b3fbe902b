//! Identifier-keyed entity resources.
//!
//! Each call opens its own session on a worker, runs inside its own
//! transaction where it mutates, and releases the session before the
//! stream sees a terminal signal.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::statement::failed;
use super::{DeletableResource, ReadableResource, WritableResource};
use crate::error::{prefer_first, Error, Result};
use crate::exec::{spawn_stream, Dispatcher, Observer, ResultStream};
use crate::session::{EntitiesById, Entity, Session, SessionFactory, SessionScope};

/// Run `work` against a fresh session, releasing it on every path.
pub(crate) fn within_session<F, R>(
    factory: &F,
    work: impl FnOnce(&mut SessionScope<F::Delegate>) -> Result<R>,
) -> Result<R>
where
    F: SessionFactory,
{
    let mut session = factory.open_scope()?;
    let outcome = work(&mut session);
    prefer_first(outcome, session.release())
}

/// Deliver a finished unit of work to `observer`, unless cancelled.
fn deliver<T, O: Observer<T>>(observer: &mut O, cancel: &CancellationToken, outcome: Result<Option<T>>) {
    if cancel.is_cancelled() {
        if let Err(e) = outcome {
            tracing::debug!(error = %e, "Error after cancellation not signalled");
        }
        return;
    }
    match outcome {
        Ok(item) => {
            if let Some(item) = item {
                observer.on_next(item);
            }
            observer.on_completed();
        }
        Err(e) => observer.on_error(e),
    }
}

/// One stored entity, addressed by identifier.
pub struct EntityResource<E: Entity, F: SessionFactory> {
    factory: Arc<F>,
    dispatcher: Arc<dyn Dispatcher>,
    id: E::Id,
}

impl<E: Entity, F: SessionFactory> EntityResource<E, F> {
    pub fn id(&self) -> &E::Id {
        &self.id
    }

    fn submit<T, W>(&self, work: W) -> ResultStream<T>
    where
        T: Send + 'static,
        W: FnOnce(&mut SessionScope<F::Delegate>, E::Id) -> Result<Option<T>> + Send + 'static,
    {
        let factory = self.factory.clone();
        let id = self.id.clone();
        spawn_stream(self.dispatcher.as_ref(), 1, move |mut observer, cancel| {
            if cancel.is_cancelled() {
                return;
            }
            let outcome = within_session(factory.as_ref(), |session| work(session, id));
            deliver(&mut observer, &cancel, outcome);
        })
    }
}

impl<E: Entity, F: SessionFactory> ReadableResource for EntityResource<E, F> {
    type Item = E;

    /// Emit the entity, or complete empty if it does not exist.
    fn get(&self) -> ResultStream<E> {
        self.submit(|session, id| EntitiesById::<E>::eager().fetch(session, id).map(|l| l.loaded()))
    }
}

impl<E: Entity, F: SessionFactory> WritableResource for EntityResource<E, F> {
    type Item = E;

    /// Save or update `value` in its own transaction.
    fn write(&self, value: E) -> ResultStream<()> {
        if value.id().is_some_and(|id| id != self.id) {
            return failed(
                self.dispatcher.as_ref(),
                Error::illegal_state(format!(
                    "{} identifier does not match resource {}",
                    E::KIND,
                    self.id
                )),
            );
        }
        self.submit(move |session, _| {
            let mut tx = session.open_transaction()?;
            tx.save_or_update(&value)?;
            tx.commit()?;
            Ok(None)
        })
    }
}

impl<E: Entity, F: SessionFactory> DeletableResource for EntityResource<E, F> {
    /// Delete by identifier without loading the entity first.
    fn delete(&self) -> ResultStream<()> {
        self.submit(|session, id| {
            let reference = EntitiesById::<E>::assume_present().reference(id);
            let mut tx = session.open_transaction()?;
            tx.delete_reference(&reference)?;
            tx.commit()?;
            Ok(None)
        })
    }
}

impl<E: Entity, F: SessionFactory> Clone for EntityResource<E, F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            dispatcher: self.dispatcher.clone(),
            id: self.id.clone(),
        }
    }
}

impl<E: Entity, F: SessionFactory> PartialEq for EntityResource<E, F> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.factory, &other.factory) && self.id == other.id
    }
}

impl<E: Entity, F: SessionFactory> fmt::Debug for EntityResource<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityResource [{}#{}]", E::KIND, self.id)
    }
}

/// Builds [`EntityResource`]s for one entity type.
pub struct EntityResourceProvider<E: Entity, F: SessionFactory> {
    factory: Arc<F>,
    dispatcher: Arc<dyn Dispatcher>,
    entity: PhantomData<fn() -> E>,
}

impl<E: Entity, F: SessionFactory> EntityResourceProvider<E, F> {
    pub fn new(factory: Arc<F>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            factory,
            dispatcher,
            entity: PhantomData,
        }
    }

    pub fn get(&self, id: E::Id) -> EntityResource<E, F> {
        EntityResource {
            factory: self.factory.clone(),
            dispatcher: self.dispatcher.clone(),
            id,
        }
    }
}

impl<E: Entity, F: SessionFactory> Clone for EntityResourceProvider<E, F> {
    fn clone(&self) -> Self {
        Self::new(self.factory.clone(), self.dispatcher.clone())
    }
}
