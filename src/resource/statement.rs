//! Statement-backed resources.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::{ReadableResource, UpdatableResource};
use crate::backend::{ConnectionProvider, Record};
use crate::error::Error;
use crate::exec::{spawn_stream, Dispatcher, ExecutionTask, Observer, ResultStream};
use crate::statement::{Parameter, StatementTemplate};

/// Stream that fails immediately with `error`.
pub(crate) fn failed<T: Send + 'static>(dispatcher: &dyn Dispatcher, error: Error) -> ResultStream<T> {
    spawn_stream(dispatcher, 1, move |mut observer, _| observer.on_error(error))
}

/// Read access to the rows of one query.
pub struct QueryResource<P: ConnectionProvider> {
    provider: Arc<P>,
    dispatcher: Arc<dyn Dispatcher>,
    template: StatementTemplate,
    buffer: usize,
}

impl<P: ConnectionProvider> QueryResource<P> {
    pub fn template(&self) -> &StatementTemplate {
        &self.template
    }
}

impl<P: ConnectionProvider> ReadableResource for QueryResource<P> {
    type Item = Record;

    /// Run the query on a worker and stream its rows in cursor order.
    fn get(&self) -> ResultStream<Record> {
        let provider = self.provider.clone();
        let template = self.template.clone();
        spawn_stream(self.dispatcher.as_ref(), self.buffer, move |mut observer, cancel| {
            ExecutionTask::new(provider, template, cancel).run_query(&mut observer);
        })
    }
}

impl<P: ConnectionProvider> Clone for QueryResource<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            dispatcher: self.dispatcher.clone(),
            template: self.template.clone(),
            buffer: self.buffer,
        }
    }
}

impl<P: ConnectionProvider> PartialEq for QueryResource<P> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.provider, &other.provider) && self.template == other.template
    }
}

impl<P: ConnectionProvider> Eq for QueryResource<P> {}

impl<P: ConnectionProvider> Hash for QueryResource<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.provider).hash(state);
        self.template.hash(state);
    }
}

impl<P: ConnectionProvider> fmt::Debug for QueryResource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryResource [template={}]", self.template)
    }
}

/// Builds [`QueryResource`]s sharing one provider and dispatcher.
pub struct QueryResourceProvider<P: ConnectionProvider> {
    provider: Arc<P>,
    dispatcher: Arc<dyn Dispatcher>,
    buffer: usize,
}

impl<P: ConnectionProvider> QueryResourceProvider<P> {
    /// # Arguments
    ///
    /// * `provider` - Connection source shared by every resource
    /// * `dispatcher` - Where tasks run
    /// * `buffer` - Rows queued between a worker and its consumer
    pub fn new(provider: Arc<P>, dispatcher: Arc<dyn Dispatcher>, buffer: usize) -> Self {
        Self {
            provider,
            dispatcher,
            buffer,
        }
    }

    pub fn get(&self, template: StatementTemplate) -> QueryResource<P> {
        QueryResource {
            provider: self.provider.clone(),
            dispatcher: self.dispatcher.clone(),
            template,
            buffer: self.buffer,
        }
    }
}

impl<P: ConnectionProvider> Clone for QueryResourceProvider<P> {
    fn clone(&self) -> Self {
        Self::new(self.provider.clone(), self.dispatcher.clone(), self.buffer)
    }
}

/// A mutation statement executed with parameters supplied per call.
pub struct UpdateResource<P: ConnectionProvider> {
    provider: Arc<P>,
    dispatcher: Arc<dyn Dispatcher>,
    text: Arc<str>,
}

impl<P: ConnectionProvider> UpdateResource<P> {
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Execute with positional values bound in order.
    pub fn execute<V: Into<crate::statement::Value>>(
        &self,
        values: impl IntoIterator<Item = V>,
    ) -> ResultStream<u64> {
        let parameters = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| Parameter::at(i + 1, v))
            .collect();
        self.update(parameters)
    }
}

impl<P: ConnectionProvider> UpdatableResource for UpdateResource<P> {
    /// Execute once on a worker; the stream yields the rows affected.
    fn update(&self, parameters: Vec<Parameter>) -> ResultStream<u64> {
        let template = match StatementTemplate::new(self.text.as_ref(), parameters) {
            Ok(template) => template,
            Err(e) => return failed(self.dispatcher.as_ref(), e),
        };
        let provider = self.provider.clone();
        spawn_stream(self.dispatcher.as_ref(), 1, move |mut observer, cancel| {
            ExecutionTask::new(provider, template, cancel).run_update(&mut observer);
        })
    }
}

impl<P: ConnectionProvider> Clone for UpdateResource<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            dispatcher: self.dispatcher.clone(),
            text: self.text.clone(),
        }
    }
}

impl<P: ConnectionProvider> PartialEq for UpdateResource<P> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.provider, &other.provider) && self.text == other.text
    }
}

impl<P: ConnectionProvider> Eq for UpdateResource<P> {}

impl<P: ConnectionProvider> Hash for UpdateResource<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.provider).hash(state);
        self.text.hash(state);
    }
}

impl<P: ConnectionProvider> fmt::Debug for UpdateResource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateResource [text={}]", self.text)
    }
}

/// Builds [`UpdateResource`]s sharing one provider and dispatcher.
pub struct UpdateResourceProvider<P: ConnectionProvider> {
    provider: Arc<P>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl<P: ConnectionProvider> UpdateResourceProvider<P> {
    pub fn new(provider: Arc<P>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            provider,
            dispatcher,
        }
    }

    pub fn get(&self, text: impl Into<String>) -> UpdateResource<P> {
        UpdateResource {
            provider: self.provider.clone(),
            dispatcher: self.dispatcher.clone(),
            text: text.into().into(),
        }
    }
}

impl<P: ConnectionProvider> Clone for UpdateResourceProvider<P> {
    fn clone(&self) -> Self {
        Self::new(self.provider.clone(), self.dispatcher.clone())
    }
}
