//! Callback context and the shared key/value stores it exposes.

use crate::dispatcher::{Dispatcher, UpdateQueue};
use crate::event::Event;
use crate::handler::{CheckOutcome, ContextNeeds, RegexMatch};
use crate::job_queue::{Job, JobQueue};
use dbot_core::{Bot, DbotError, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Shared JSON key/value map. Clones share the same storage.
///
/// Each call takes the lock once; use [`DataStore::update`] for read-modify-write sequences.
#[derive(Debug, Clone, Default)]
pub struct DataStore(Arc<RwLock<HashMap<String, Value>>>);

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.read().get(key).cloned()
    }

    /// Reads `key` and deserializes it; `None` when missing or of another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Stores `value` under `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Serialize) -> Result<Option<Value>> {
        let value = serde_json::to_value(value)?;
        Ok(self.0.write().insert(key.into(), value))
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.write().remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Runs `f` with exclusive access to the map.
    pub fn update<R>(&self, f: impl FnOnce(&mut HashMap<String, Value>) -> R) -> R {
        f(&mut self.0.write())
    }

    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.0.read().clone()
    }

    pub fn ptr_eq(&self, other: &DataStore) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Everything a callback may need besides the event itself.
#[derive(Clone)]
pub struct CallbackContext {
    dispatcher: Dispatcher,
    needs: ContextNeeds,
    chat_data: Option<DataStore>,
    user_data: Option<DataStore>,
    args: Option<Vec<String>>,
    matches: Vec<RegexMatch>,
    error: Option<Arc<DbotError>>,
    job: Option<Job>,
}

impl CallbackContext {
    fn bare(dispatcher: &Dispatcher, needs: ContextNeeds) -> Self {
        Self {
            dispatcher: dispatcher.clone(),
            needs,
            chat_data: None,
            user_data: None,
            args: None,
            matches: Vec::new(),
            error: None,
            job: None,
        }
    }

    /// Context for a handler callback. Per-chat and per-user stores are resolved (and created on
    /// first touch) only when `needs` asks for them.
    pub fn from_event(event: &Event, dispatcher: &Dispatcher, needs: ContextNeeds) -> Self {
        let mut context = Self::bare(dispatcher, needs);
        if needs.chat_data {
            context.chat_data = event.chat_id().map(|id| dispatcher.chat_data(id));
        }
        if needs.user_data {
            context.user_data = event.user_id().map(|id| dispatcher.user_data(id));
        }
        context
    }

    pub fn from_error(event: Option<&Event>, error: Arc<DbotError>, dispatcher: &Dispatcher) -> Self {
        let mut context = match event {
            Some(event) => Self::from_event(event, dispatcher, ContextNeeds::default()),
            None => Self::bare(dispatcher, ContextNeeds::default()),
        };
        context.error = Some(error);
        context
    }

    pub fn from_job(job: Job, dispatcher: &Dispatcher) -> Self {
        let mut context = Self::bare(dispatcher, ContextNeeds::default());
        context.job = Some(job);
        context
    }

    pub(crate) fn apply_outcome(&mut self, outcome: CheckOutcome) {
        if outcome.args.is_some() {
            self.args = outcome.args;
        }
        self.matches = outcome.matches;
    }

    pub fn bot(&self) -> &Arc<dyn Bot> {
        self.dispatcher.bot()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn bot_data(&self) -> DataStore {
        self.dispatcher.bot_data()
    }

    pub fn chat_data(&self) -> Option<&DataStore> {
        self.chat_data.as_ref()
    }

    pub fn user_data(&self) -> Option<&DataStore> {
        self.user_data.as_ref()
    }

    pub fn job_queue(&self) -> Option<JobQueue> {
        if self.needs.job_queue {
            self.dispatcher.job_queue()
        } else {
            None
        }
    }

    pub fn update_queue(&self) -> Option<UpdateQueue> {
        self.needs.update_queue.then(|| self.dispatcher.update_queue())
    }

    /// Command arguments, for command-style handlers.
    pub fn args(&self) -> Option<&[String]> {
        self.args.as_deref()
    }

    /// All regex matches collected while checking the event.
    pub fn matches(&self) -> &[RegexMatch] {
        &self.matches
    }

    /// First regex match, if any.
    pub fn match_(&self) -> Option<&RegexMatch> {
        self.matches.first()
    }

    pub fn error(&self) -> Option<&DbotError> {
        self.error.as_deref()
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }
}
