//! Handlers: a predicate over [`Event`] paired with a [`Callback`].
//!
//! `check_update` decides relevance and returns what it extracted (command arguments, regex
//! matches); `handle_update` folds that into the [`CallbackContext`] and runs the callback inline
//! or on the dispatcher's async pool.

mod command;
mod message;
mod query;
mod string;
mod typed;

pub use command::{CommandHandler, PrefixHandler};
pub use message::MessageHandler;
pub use query::{
    CallbackQueryHandler, ChosenInlineResultHandler, InlineQueryHandler, PollAnswerHandler,
    PollHandler, PreCheckoutQueryHandler, ShippingQueryHandler,
};
pub use string::{StringCommandHandler, StringRegexHandler};
pub use typed::TypeHandler;

use crate::callback::Callback;
use crate::context::CallbackContext;
use crate::dispatcher::Dispatcher;
use crate::event::Event;
use async_trait::async_trait;
use dbot_core::{HandlerError, Result};
use regex::{Captures, Regex};
use std::collections::HashMap;

/// One regex match: the whole matched text plus positional and named groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegexMatch {
    pub text: String,
    /// Groups 1..n; `None` for groups that did not participate.
    pub groups: Vec<Option<String>>,
    pub named: HashMap<String, String>,
}

impl RegexMatch {
    pub fn from_captures(regex: &Regex, captures: &Captures<'_>) -> Self {
        let text = captures.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
        let groups = captures
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_string()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| captures.name(name).map(|m| (name.to_string(), m.as_str().to_string())))
            .collect();
        Self { text, groups, named }
    }

    /// Positional group `index` (1-based, like regex groups).
    pub fn group(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .and_then(|g| g.as_deref())
    }

    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// What a successful `check_update` extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    pub args: Option<Vec<String>>,
    pub matches: Vec<RegexMatch>,
}

impl CheckOutcome {
    pub fn matched() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    #[must_use]
    pub fn with_matches(mut self, matches: Vec<RegexMatch>) -> Self {
        self.matches.extend(matches);
        self
    }
}

/// Which parts of the context a handler's callback uses. Stores that are not needed are never
/// created for the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextNeeds {
    pub user_data: bool,
    pub chat_data: bool,
    pub job_queue: bool,
    pub update_queue: bool,
}

impl Default for ContextNeeds {
    fn default() -> Self {
        Self {
            user_data: true,
            chat_data: true,
            job_queue: true,
            update_queue: true,
        }
    }
}

impl ContextNeeds {
    pub fn none() -> Self {
        Self {
            user_data: false,
            chat_data: false,
            job_queue: false,
            update_queue: false,
        }
    }

    #[must_use]
    pub fn user_data(mut self, on: bool) -> Self {
        self.user_data = on;
        self
    }

    #[must_use]
    pub fn chat_data(mut self, on: bool) -> Self {
        self.chat_data = on;
        self
    }

    #[must_use]
    pub fn job_queue(mut self, on: bool) -> Self {
        self.job_queue = on;
        self
    }

    #[must_use]
    pub fn update_queue(mut self, on: bool) -> Self {
        self.update_queue = on;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerOptions {
    /// Run the callback on the dispatcher's async pool instead of the worker that pulled the event.
    pub run_async: bool,
    pub needs: ContextNeeds,
}

impl HandlerOptions {
    #[must_use]
    pub fn run_async(mut self, on: bool) -> Self {
        self.run_async = on;
        self
    }

    #[must_use]
    pub fn needs(mut self, needs: ContextNeeds) -> Self {
        self.needs = needs;
        self
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// `None` means "not interested". Must not mutate anything reachable from the event.
    fn check_update(&self, event: &Event) -> Option<CheckOutcome>;

    fn callback(&self) -> &Callback;

    fn options(&self) -> HandlerOptions;

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called once by [`Dispatcher::add_handler`], before the handler sees any event.
    fn attach(&self, _dispatcher: &Dispatcher) {}

    /// Runs the callback for an event that passed `check_update`.
    ///
    /// With `run_async` the callback is handed to [`Dispatcher::run_async`] and this returns
    /// immediately; its errors then reach the error handlers from the pool.
    async fn handle_update(
        &self,
        event: Event,
        dispatcher: &Dispatcher,
        outcome: CheckOutcome,
        mut context: CallbackContext,
    ) -> Result<()> {
        context.apply_outcome(outcome);
        let future = self.callback().call(event.clone(), context);
        if self.options().run_async {
            dispatcher.run_async(Some(event), future);
            Ok(())
        } else {
            future.await
        }
    }
}

/// Compiles `pattern` so it only matches at the start of the text.
pub(crate) fn anchored_regex(pattern: &str) -> Result<Regex> {
    Regex::new(&format!(r"\A(?:{pattern})"))
        .map_err(|e| HandlerError::InvalidPattern(format!("{pattern}: {e}")).into())
}

pub(crate) fn match_at_start(regex: &Regex, text: &str) -> Option<RegexMatch> {
    regex.captures(text).map(|c| RegexMatch::from_captures(regex, &c))
}
