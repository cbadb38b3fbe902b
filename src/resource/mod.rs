//! Uniform read/write/delete/update contract.
//!
//! Every operation returns a [`ResultStream`] immediately; the blocking work
//! runs on a dispatcher worker.

mod entity;
mod statement;

pub use entity::{EntityResource, EntityResourceProvider};
pub(crate) use entity::within_session;
pub use statement::{QueryResource, QueryResourceProvider, UpdateResource, UpdateResourceProvider};

use crate::exec::ResultStream;
use crate::statement::Parameter;

/// A resource that can be read.
pub trait ReadableResource {
    type Item: Send + 'static;

    fn get(&self) -> ResultStream<Self::Item>;
}

/// A resource that can be written. The stream completes without items.
pub trait WritableResource {
    type Item: Send + 'static;

    fn write(&self, value: Self::Item) -> ResultStream<()>;
}

/// A resource that can be deleted. The stream completes without items.
pub trait DeletableResource {
    fn delete(&self) -> ResultStream<()>;
}

/// A resource updated with per-call parameters, reporting rows affected.
pub trait UpdatableResource {
    fn update(&self, parameters: Vec<Parameter>) -> ResultStream<u64>;
}
