use super::{CheckOutcome, Handler, HandlerOptions};
use crate::callback::Callback;
use crate::event::Event;
use crate::filters::{Filter, UpdateKindFilter};

/// Handles message-like updates passing a [`Filter`].
///
/// By default new and edited messages and channel posts are all considered; narrow that with
/// [`MessageHandler::with_kinds`].
pub struct MessageHandler {
    filter: Filter,
    kinds: UpdateKindFilter,
    callback: Callback,
    options: HandlerOptions,
}

impl MessageHandler {
    pub fn new(filter: Filter, callback: Callback) -> Self {
        Self {
            filter,
            kinds: UpdateKindFilter::Any,
            callback,
            options: HandlerOptions::default(),
        }
    }

    #[must_use]
    pub fn with_kinds(mut self, kinds: UpdateKindFilter) -> Self {
        self.kinds = kinds;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

impl Handler for MessageHandler {
    fn check_update(&self, event: &Event) -> Option<CheckOutcome> {
        let update = event.update()?;
        if !self.kinds.accepts(&update.kind) {
            return None;
        }
        self.filter
            .check(update)
            .map(|matches| CheckOutcome::matched().with_matches(matches))
    }

    fn callback(&self) -> &Callback {
        &self.callback
    }

    fn options(&self) -> HandlerOptions {
        self.options
    }
}
