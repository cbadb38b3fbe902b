//! Store facade over a SQLite database.

use std::sync::Arc;
use tokio::runtime::Handle;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::exec::{spawn_stream, Dispatcher, Observer, TokioDispatcher};
use crate::resource::{
    within_session, EntityResource, EntityResourceProvider, QueryResource, QueryResourceProvider, UpdateResource,
    UpdateResourceProvider,
};
use crate::session::{Entity, SessionScope};
use crate::sqlite::{SqlitePool, SqliteSession, SqliteSessionFactory};
use crate::statement::StatementTemplate;

/// Pool, dispatcher and session factory for one database.
///
/// Cheap to clone; clones share the pool and the dispatcher.
#[derive(Clone)]
pub struct Store {
    config: StoreConfig,
    pool: Arc<SqlitePool>,
    sessions: Arc<SqliteSessionFactory>,
    dispatcher: Arc<dyn Dispatcher>,
    queries: QueryResourceProvider<SqlitePool>,
    updates: UpdateResourceProvider<SqlitePool>,
}

impl Store {
    /// Open a store on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a runtime or when the pool
    /// cannot be created.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::Dispatch(e.to_string()))?;
        let dispatcher = Arc::new(TokioDispatcher::from_config(runtime, &config));
        Self::with_dispatcher(config, dispatcher)
    }

    /// Open a store whose tasks run on `dispatcher`.
    pub fn with_dispatcher(config: StoreConfig, dispatcher: Arc<dyn Dispatcher>) -> Result<Self> {
        let pool = SqlitePool::from_config(&config)?;
        tracing::info!(
            db = %config.db_path.display(),
            pool_size = config.pool_size,
            worker_limit = config.worker_limit,
            "Store opened"
        );
        let sessions = Arc::new(SqliteSessionFactory::new(pool.clone()));
        let pool = Arc::new(pool);
        Ok(Self {
            queries: QueryResourceProvider::new(pool.clone(), dispatcher.clone(), config.stream_buffer),
            updates: UpdateResourceProvider::new(pool.clone(), dispatcher.clone()),
            config,
            pool,
            sessions,
            dispatcher,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Read access to the rows of `template`.
    pub fn query(&self, template: StatementTemplate) -> QueryResource<SqlitePool> {
        self.queries.get(template)
    }

    /// An update statement executed with per-call parameters.
    pub fn update(&self, text: impl Into<String>) -> UpdateResource<SqlitePool> {
        self.updates.get(text)
    }

    /// The entity of type `E` stored under `id`.
    pub fn entity<E: Entity>(&self, id: E::Id) -> EntityResource<E, SqliteSessionFactory> {
        self.entities::<E>().get(id)
    }

    pub fn entities<E: Entity>(&self) -> EntityResourceProvider<E, SqliteSessionFactory> {
        EntityResourceProvider::new(self.sessions.clone(), self.dispatcher.clone())
    }

    /// Run `work` against a fresh session on a worker.
    ///
    /// The session is released before the result is returned, whether
    /// `work` succeeds or fails. Open transactions left behind by `work`
    /// have already been rolled back by then.
    pub async fn with_session<R, F>(&self, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut SessionScope<SqliteSession>) -> Result<R> + Send + 'static,
    {
        let sessions = self.sessions.clone();
        let stream = spawn_stream(self.dispatcher.as_ref(), 1, move |mut observer, cancel| {
            if cancel.is_cancelled() {
                return;
            }
            match within_session(sessions.as_ref(), work) {
                Ok(value) => {
                    observer.on_next(value);
                    observer.on_completed();
                }
                Err(e) => observer.on_error(e),
            }
        });
        stream
            .single()
            .await?
            .ok_or_else(|| Error::Dispatch("session work produced no result".into()))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.config.db_path)
            .finish_non_exhaustive()
    }
}
