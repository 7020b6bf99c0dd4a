use super::{CheckOutcome, Handler, HandlerOptions};
use crate::callback::Callback;
use crate::dispatcher::{Dispatcher, SharedUsername};
use crate::event::Event;
use crate::filters::Filter;
use dbot_core::{HandlerError, Message, Result, Update, UpdateKind};
use std::collections::HashSet;
use std::sync::OnceLock;

fn is_valid_command(command: &str) -> bool {
    (1..=32).contains(&command.len())
        && command
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Message (or, with `allow_edited`, edited message) carrying text.
fn command_message(update: &Update, allow_edited: bool) -> Option<&Message> {
    match &update.kind {
        UpdateKind::Message(m) => Some(m),
        UpdateKind::EditedMessage(m) if allow_edited => Some(m),
        _ => None,
    }
}

fn apply_filter(filter: Option<&Filter>, update: &Update, args: Vec<String>) -> Option<CheckOutcome> {
    let outcome = CheckOutcome::matched().with_args(args);
    match filter {
        Some(filter) => filter.check(update).map(|m| outcome.with_matches(m)),
        None => Some(outcome),
    }
}

/// Handles `/command [args...]` messages.
///
/// Commands are case-insensitive. A `/command@name` suffix must name this bot: the username set
/// with [`CommandHandler::for_bot`], else the one the dispatcher learned from `getMe`. Until either
/// is known any suffix is accepted.
pub struct CommandHandler {
    commands: HashSet<String>,
    callback: Callback,
    filter: Option<Filter>,
    allow_edited: bool,
    bot_username: Option<String>,
    dispatcher_username: OnceLock<SharedUsername>,
    options: HandlerOptions,
}

impl CommandHandler {
    /// Fails with [`HandlerError::InvalidCommand`] unless every command is 1-32 characters of
    /// `a-z`, `0-9` and `_` (after lowercasing).
    pub fn new<I, S>(commands: I, callback: Callback) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for command in commands {
            let command = command.as_ref().to_lowercase();
            if !is_valid_command(&command) {
                return Err(HandlerError::InvalidCommand(command).into());
            }
            set.insert(command);
        }
        if set.is_empty() {
            return Err(HandlerError::InvalidCommand(String::new()).into());
        }
        Ok(Self {
            commands: set,
            callback,
            filter: None,
            allow_edited: false,
            bot_username: None,
            dispatcher_username: OnceLock::new(),
            options: HandlerOptions::default(),
        })
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn allow_edited(mut self, allow: bool) -> Self {
        self.allow_edited = allow;
        self
    }

    /// Only accept `/command@username` for this username (and plain `/command`).
    #[must_use]
    pub fn for_bot(mut self, username: impl AsRef<str>) -> Self {
        self.bot_username = Some(username.as_ref().trim_start_matches('@').to_lowercase());
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn commands(&self) -> &HashSet<String> {
        &self.commands
    }

    fn addressed_to_me(&self, target: &str) -> bool {
        let target = target.to_lowercase();
        if let Some(me) = self.bot_username.as_deref() {
            return target == me;
        }
        match self.dispatcher_username.get().and_then(|shared| shared.read().clone()) {
            Some(me) => target == me,
            None => true,
        }
    }
}

impl Handler for CommandHandler {
    fn check_update(&self, event: &Event) -> Option<CheckOutcome> {
        let update = event.update()?;
        let text = command_message(update, self.allow_edited)?.text.as_deref()?;
        let mut words = text.split_whitespace();
        let head = words.next()?.strip_prefix('/')?;

        let (command, target) = match head.split_once('@') {
            Some((command, target)) => (command, Some(target)),
            None => (head, None),
        };
        if !self.commands.contains(&command.to_lowercase()) {
            return None;
        }
        if target.is_some_and(|target| !self.addressed_to_me(target)) {
            return None;
        }

        let args = words.map(str::to_string).collect();
        apply_filter(self.filter.as_ref(), update, args)
    }

    fn callback(&self) -> &Callback {
        &self.callback
    }

    fn options(&self) -> HandlerOptions {
        self.options
    }

    fn attach(&self, dispatcher: &Dispatcher) {
        let _ = self.dispatcher_username.set(dispatcher.shared_username());
    }
}

/// Handles commands behind custom prefixes, e.g. `!help` or `#help`.
///
/// Every prefix is combined with every command; matching is case-insensitive and looks only at
/// the first word of the text.
pub struct PrefixHandler {
    triggers: HashSet<String>,
    callback: Callback,
    filter: Option<Filter>,
    options: HandlerOptions,
}

impl PrefixHandler {
    pub fn new<P, C, S, T>(prefixes: P, commands: C, callback: Callback) -> Self
    where
        P: IntoIterator<Item = S>,
        C: IntoIterator<Item = T>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let commands: Vec<String> = commands
            .into_iter()
            .map(|c| c.as_ref().to_lowercase())
            .collect();
        let triggers = prefixes
            .into_iter()
            .flat_map(|p| {
                let prefix = p.as_ref().to_lowercase();
                commands
                    .iter()
                    .map(move |c| format!("{prefix}{c}"))
                    .collect::<Vec<_>>()
            })
            .collect();
        Self {
            triggers,
            callback,
            filter: None,
            options: HandlerOptions::default(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

impl Handler for PrefixHandler {
    fn check_update(&self, event: &Event) -> Option<CheckOutcome> {
        let update = event.update()?;
        let text = command_message(update, false)?.text.as_deref()?;
        let mut words = text.split_whitespace();
        let head = words.next()?.to_lowercase();
        if !self.triggers.contains(&head) {
            return None;
        }
        let args = words.map(str::to_string).collect();
        apply_filter(self.filter.as_ref(), update, args)
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
    use dbot_core::{Chat, ChatType};

    fn noop() -> Callback {
        Callback::new(|_, _| async { Ok(()) })
    }

    fn text_event(text: &str) -> Event {
        Update::new(1, UpdateKind::Message(Message::new(1, Chat::new(1, ChatType::Private)).with_text(text))).into()
    }

    #[test]
    fn test_command_validation() {
        assert!(CommandHandler::new(["start", "Help_2"], noop()).is_ok());
        assert!(CommandHandler::new(["with space"], noop()).is_err());
        assert!(CommandHandler::new(["dash-ed"], noop()).is_err());
        assert!(CommandHandler::new(["a".repeat(33)], noop()).is_err());
        assert!(CommandHandler::new(Vec::<String>::new(), noop()).is_err());
    }

    #[test]
    fn test_command_args() {
        let handler = CommandHandler::new(["test"], noop()).unwrap();

        let outcome = handler.check_update(&text_event("/test one two")).unwrap();
        assert_eq!(outcome.args, Some(vec!["one".to_string(), "two".to_string()]));

        let outcome = handler.check_update(&text_event("/test")).unwrap();
        assert_eq!(outcome.args, Some(vec![]));

        assert!(handler.check_update(&text_event("/testing")).is_none());
        assert!(handler.check_update(&text_event("test")).is_none());
        assert!(handler.check_update(&text_event("/TEST")).is_some());
    }

    #[test]
    fn test_bot_username_suffix() {
        let unknown = CommandHandler::new(["test"], noop()).unwrap();
        let strict = CommandHandler::new(["test"], noop()).unwrap().for_bot("@My_Bot");

        assert!(unknown.check_update(&text_event("/test@other_bot")).is_some());
        assert!(strict.check_update(&text_event("/test@my_bot x")).is_some());
        assert!(strict.check_update(&text_event("/test")).is_some());
        assert!(strict.check_update(&text_event("/test@other_bot")).is_none());
    }

    #[test]
    fn test_edited_messages_need_opt_in() {
        let edited: Event = Update::new(
            2,
            UpdateKind::EditedMessage(Message::new(1, Chat::new(1, ChatType::Private)).with_text("/test")),
        )
        .into();

        let handler = CommandHandler::new(["test"], noop()).unwrap();
        assert!(handler.check_update(&edited).is_none());
        assert!(handler.allow_edited(true).check_update(&edited).is_some());
    }

    #[test]
    fn test_command_filter_rejects() {
        let handler = CommandHandler::new(["test"], noop()).unwrap().with_filter(Filter::Group);
        assert!(handler.check_update(&text_event("/test")).is_none());
    }

    #[test]
    fn test_prefix_handler() {
        let handler = PrefixHandler::new(["!", "#"], ["help", "info"], noop());

        let outcome = handler.check_update(&text_event("#Help me")).unwrap();
        assert_eq!(outcome.args, Some(vec!["me".to_string()]));
        assert!(handler.check_update(&text_event("!info")).is_some());
        assert!(handler.check_update(&text_event("/help")).is_none());
    }
}
