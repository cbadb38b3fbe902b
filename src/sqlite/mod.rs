//! SQLite backend.
//!
//! Provides:
//! - [`SqlitePool`]: r2d2 connection pool implementing the backend traits
//! - [`SqliteSessionFactory`]: session delegates for entity access

mod pool;
mod session;

pub use pool::{SqliteConnection, SqliteCursor, SqliteOperation, SqlitePool};
pub use session::{SqliteSession, SqliteSessionFactory};
