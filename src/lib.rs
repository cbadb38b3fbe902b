//! Crudstream: cancellable, streamed access to SQL stores.
//!
//! Blocking store work (acquiring a connection, executing a statement,
//! advancing a cursor) runs on worker threads and reaches callers as a lazy
//! [`ResultStream`]. Every resource a worker acquires is released, in
//! reverse order, before the stream sees completion or an error.
//!
//! # Architecture
//!
//! - **Streamed**: rows are handed over one at a time through a bounded channel
//! - **Cancellable**: cancellation stops a cursor at its next row boundary
//! - **Scoped**: sessions and transactions release and roll back on drop
//! - **Observable**: tracing spans and OpenTelemetry counters per task
//!
//! # Modules
//!
//! - [`backend`]: Connection, operation and cursor traits
//! - [`config`]: CLI and environment configuration
//! - [`exec`]: Execution tasks, dispatch and result streams
//! - [`observability`]: Metrics and tracing setup
//! - [`resource`]: Uniform read/write/delete/update resources
//! - [`session`]: Session and transaction scopes, identifier lookups
//! - [`sqlite`]: SQLite backend over an r2d2 pool
//! - [`statement`]: Statement templates and parameter values

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions,    // session::SessionScope is fine
    clippy::must_use_candidate,         // Not all functions need #[must_use]
    clippy::missing_errors_doc,         // Error docs can be verbose
    clippy::missing_panics_doc,         // Panic docs can be verbose
    clippy::needless_raw_string_hashes, // r#""# is fine for SQL
    clippy::cast_possible_truncation,   // Row counts and elapsed millis fit
    clippy::too_many_lines              // Some functions are inherently long
)]

pub mod backend;
pub mod config;
pub mod error;
pub mod exec;
pub mod observability;
pub mod resource;
pub mod session;
pub mod sqlite;
pub mod statement;
mod store;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use exec::{CancelHandle, ResultStream, RowWindow, Termination};
pub use resource::{DeletableResource, ReadableResource, UpdatableResource, WritableResource};
pub use session::{Entity, EntitiesById, Session, SessionScope, TransactionScope};
pub use statement::{Parameter, StatementTemplate, TypeTag, Value};
pub use store::Store;
