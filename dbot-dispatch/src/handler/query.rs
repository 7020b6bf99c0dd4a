//! Handlers for the non-message update kinds.

use super::{anchored_regex, match_at_start, CheckOutcome, Handler, HandlerOptions};
use crate::callback::Callback;
use crate::event::Event;
use dbot_core::{Result, UpdateKind};
use regex::Regex;

/// Applies an optional start-anchored pattern to `text`. Without a pattern any payload matches;
/// with one, a missing text never matches.
fn check_pattern(pattern: Option<&Regex>, text: Option<&str>) -> Option<CheckOutcome> {
    match pattern {
        None => Some(CheckOutcome::matched()),
        Some(regex) => {
            let m = match_at_start(regex, text?)?;
            Some(CheckOutcome::matched().with_matches(vec![m]))
        }
    }
}

macro_rules! pattern_handler {
    ($(#[$doc:meta])* $name:ident, $variant:ident, |$payload:ident| $text:expr) => {
        $(#[$doc])*
        pub struct $name {
            pattern: Option<Regex>,
            callback: Callback,
            options: HandlerOptions,
        }

        impl $name {
            pub fn new(callback: Callback) -> Self {
                Self {
                    pattern: None,
                    callback,
                    options: HandlerOptions::default(),
                }
            }

            /// Only match when the pattern matches at the start of the text.
            pub fn with_pattern(mut self, pattern: &str) -> Result<Self> {
                self.pattern = Some(anchored_regex(pattern)?);
                Ok(self)
            }

            #[must_use]
            pub fn with_options(mut self, options: HandlerOptions) -> Self {
                self.options = options;
                self
            }
        }

        impl Handler for $name {
            fn check_update(&self, event: &Event) -> Option<CheckOutcome> {
                match &event.update()?.kind {
                    UpdateKind::$variant($payload) => check_pattern(self.pattern.as_ref(), $text),
                    _ => None,
                }
            }

            fn callback(&self) -> &Callback {
                &self.callback
            }

            fn options(&self) -> HandlerOptions {
                self.options
            }
        }
    };
}

macro_rules! presence_handler {
    ($(#[$doc:meta])* $name:ident, $variant:ident) => {
        $(#[$doc])*
        pub struct $name {
            callback: Callback,
            options: HandlerOptions,
        }

        impl $name {
            pub fn new(callback: Callback) -> Self {
                Self {
                    callback,
                    options: HandlerOptions::default(),
                }
            }

            #[must_use]
            pub fn with_options(mut self, options: HandlerOptions) -> Self {
                self.options = options;
                self
            }
        }

        impl Handler for $name {
            fn check_update(&self, event: &Event) -> Option<CheckOutcome> {
                matches!(event.update()?.kind, UpdateKind::$variant(_)).then(CheckOutcome::matched)
            }

            fn callback(&self) -> &Callback {
                &self.callback
            }

            fn options(&self) -> HandlerOptions {
                self.options
            }
        }
    };
}

pattern_handler!(
    /// Callback queries, optionally filtered by a pattern over `data`.
    CallbackQueryHandler,
    CallbackQuery,
    |query| query.data.as_deref()
);

pattern_handler!(
    /// Inline queries, optionally filtered by a pattern over the query text.
    InlineQueryHandler,
    InlineQuery,
    |query| Some(query.query.as_str())
);

pattern_handler!(
    /// Chosen inline results, optionally filtered by a pattern over `result_id`.
    ChosenInlineResultHandler,
    ChosenInlineResult,
    |result| Some(result.result_id.as_str())
);

presence_handler!(ShippingQueryHandler, ShippingQuery);
presence_handler!(PreCheckoutQueryHandler, PreCheckoutQuery);
presence_handler!(
    /// Poll state updates (new polls and stopped polls the bot knows about).
    PollHandler,
    Poll
);
presence_handler!(PollAnswerHandler, PollAnswer);
