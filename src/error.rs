//! Error taxonomy for crudstream operations.
//!
//! Every failure surfaced to a caller is one of these variants. Cancellation
//! is deliberately absent: a cancelled operation ends silently and reports
//! [`Termination::Cancelled`](crate::exec::Termination::Cancelled) instead.

use std::fmt;
use thiserror::Error;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A statement template could not be bound to a live connection.
    #[error("Failed to bind statement: {0}")]
    Binding(String),

    /// Acquiring, executing, or releasing a store resource failed.
    #[error("Store error during {action}: {message}")]
    Resource {
        action: &'static str,
        message: String,
    },

    /// An operation was issued against a terminated transaction or a
    /// released session.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// A deferred entity reference was dereferenced for a missing identifier.
    #[error("No {entity} entity with identifier {id}")]
    EntityNotFound { entity: &'static str, id: String },

    /// The worker ended without signalling completion or an error.
    #[error("Worker failed: {0}")]
    Dispatch(String),
}

impl Error {
    /// Wrap a store-level failure, recording which step failed.
    pub fn resource(action: &'static str, err: impl fmt::Display) -> Self {
        Self::Resource {
            action,
            message: err.to_string(),
        }
    }

    pub fn binding(message: impl Into<String>) -> Self {
        Self::Binding(message.into())
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// The step that failed, for resource errors.
    pub fn action(&self) -> Option<&'static str> {
        match self {
            Self::Resource { action, .. } => Some(action),
            _ => None,
        }
    }

    pub fn is_binding(&self) -> bool {
        matches!(self, Self::Binding(_))
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Combine the outcome of a step with the outcome of releasing the resource
/// that step used.
///
/// The first failure wins: a release error is only returned when the step
/// itself succeeded, otherwise it is logged and dropped.
pub(crate) fn prefer_first<T>(outcome: Result<T>, release: Result<()>) -> Result<T> {
    match (outcome, release) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release_err)) => Err(release_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(release_err)) => {
            tracing::warn!(
                error = %release_err,
                primary = %err,
                "Suppressed release failure after earlier error"
            );
            Err(err)
        }
    }
}
