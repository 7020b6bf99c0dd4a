//! Handlers for synthetic string updates pushed onto the update queue by application code.

use super::{anchored_regex, match_at_start, CheckOutcome, Handler, HandlerOptions};
use crate::callback::Callback;
use crate::event::Event;
use dbot_core::Result;
use regex::Regex;

/// Matches `/command arg...` string events. Case-sensitive, no validation of the command.
pub struct StringCommandHandler {
    command: String,
    callback: Callback,
    options: HandlerOptions,
}

impl StringCommandHandler {
    pub fn new(command: impl Into<String>, callback: Callback) -> Self {
        Self {
            command: command.into(),
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

impl Handler for StringCommandHandler {
    fn check_update(&self, event: &Event) -> Option<CheckOutcome> {
        let mut words = event.text()?.strip_prefix('/')?.split_whitespace();
        if words.next()? != self.command {
            return None;
        }
        Some(CheckOutcome::matched().with_args(words.map(str::to_string).collect()))
    }

    fn callback(&self) -> &Callback {
        &self.callback
    }

    fn options(&self) -> HandlerOptions {
        self.options
    }
}

/// Matches string events against a start-anchored pattern.
pub struct StringRegexHandler {
    pattern: Regex,
    callback: Callback,
    options: HandlerOptions,
}

impl StringRegexHandler {
    pub fn new(pattern: &str, callback: Callback) -> Result<Self> {
        Ok(Self {
            pattern: anchored_regex(pattern)?,
            callback,
            options: HandlerOptions::default(),
        })
    }

    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

impl Handler for StringRegexHandler {
    fn check_update(&self, event: &Event) -> Option<CheckOutcome> {
        let m = match_at_start(&self.pattern, event.text()?)?;
        Some(CheckOutcome::matched().with_matches(vec![m]))
    }

    fn callback(&self) -> &Callback {
        &self.callback
    }

    fn options(&self) -> HandlerOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Callback {
        Callback::new(|_, _| async { Ok(()) })
    }

    #[test]
    fn test_string_command() {
        let handler = StringCommandHandler::new("reload", noop());

        let outcome = handler.check_update(&Event::from("/reload now please")).unwrap();
        assert_eq!(outcome.args, Some(vec!["now".to_string(), "please".to_string()]));
        assert_eq!(handler.check_update(&Event::from("/reload")).unwrap().args, Some(vec![]));
        assert!(handler.check_update(&Event::from("/Reload")).is_none());
        assert!(handler.check_update(&Event::from("reload")).is_none());
        assert!(handler.check_update(&Event::from("/")).is_none());
    }

    #[test]
    fn test_string_regex() {
        let handler = StringRegexHandler::new(r"set (?P<key>\w+)=(\w+)", noop()).unwrap();

        let outcome = handler.check_update(&Event::from("set mode=fast")).unwrap();
        assert_eq!(outcome.matches[0].name("key"), Some("mode"));
        assert_eq!(outcome.matches[0].group(2), Some("fast"));
        assert!(handler.check_update(&Event::from("please set mode=fast")).is_none());
        assert!(StringRegexHandler::new("(", noop()).is_err());
    }
}
