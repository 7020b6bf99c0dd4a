//! Composable predicates over message-like updates.
//!
//! Leaves test one property of the update; `&`, `|`, `^` and `!` build trees. A filter that
//! passes yields the regex matches its leaves collected: `And` keeps both sides', `Or` and
//! `Xor` keep the matching side's, `Not` contributes none.

use crate::handler::RegexMatch;
use dbot_core::{ChatType, HandlerError, Message, Result, Update, UpdateKind};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Not};
use std::sync::Arc;

type Predicate = dyn Fn(&Update) -> bool + Send + Sync;

/// Which message-like update kinds a [`Filter::Kind`] leaf accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKindFilter {
    Message,
    EditedMessage,
    /// New or edited messages.
    Messages,
    ChannelPost,
    EditedChannelPost,
    /// New or edited channel posts.
    ChannelPosts,
    /// Edited messages or edited channel posts.
    Edited,
    /// Any of the four message-like kinds.
    Any,
}

impl UpdateKindFilter {
    pub fn accepts(self, kind: &UpdateKind) -> bool {
        use UpdateKindFilter as F;
        match kind {
            UpdateKind::Message(_) => matches!(self, F::Message | F::Messages | F::Any),
            UpdateKind::EditedMessage(_) => {
                matches!(self, F::EditedMessage | F::Messages | F::Edited | F::Any)
            }
            UpdateKind::ChannelPost(_) => matches!(self, F::ChannelPost | F::ChannelPosts | F::Any),
            UpdateKind::EditedChannelPost(_) => {
                matches!(self, F::EditedChannelPost | F::ChannelPosts | F::Edited | F::Any)
            }
            _ => false,
        }
    }
}

#[derive(Clone)]
pub enum Filter {
    /// Any message-like update.
    All,
    /// Message has text.
    Text,
    /// Text starts with `/`.
    Command,
    Caption,
    /// Message replies to another message.
    Reply,
    Private,
    /// Group or supergroup chat.
    Group,
    Channel,
    /// Searches the message text; contributes the match.
    Regex(Regex),
    Chat(HashSet<i64>),
    /// Sender id.
    User(HashSet<i64>),
    /// Sender username, without the leading `@`.
    Username(HashSet<String>),
    Kind(UpdateKindFilter),
    Custom(String, Arc<Predicate>),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Xor(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn regex(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Filter::Regex)
            .map_err(|e| HandlerError::InvalidPattern(format!("{pattern}: {e}")).into())
    }

    pub fn chats(ids: impl IntoIterator<Item = i64>) -> Self {
        Filter::Chat(ids.into_iter().collect())
    }

    pub fn users(ids: impl IntoIterator<Item = i64>) -> Self {
        Filter::User(ids.into_iter().collect())
    }

    pub fn usernames<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> Self {
        Filter::Username(
            names
                .into_iter()
                .map(|n| n.as_ref().trim_start_matches('@').to_string())
                .collect(),
        )
    }

    pub fn custom(name: impl Into<String>, predicate: impl Fn(&Update) -> bool + Send + Sync + 'static) -> Self {
        Filter::Custom(name.into(), Arc::new(predicate))
    }

    /// `None` when the update does not pass; otherwise the regex matches collected on the way.
    pub fn check(&self, update: &Update) -> Option<Vec<RegexMatch>> {
        match self {
            Filter::And(a, b) => {
                let mut matches = a.check(update)?;
                matches.extend(b.check(update)?);
                Some(matches)
            }
            Filter::Or(a, b) => a.check(update).or_else(|| b.check(update)),
            Filter::Xor(a, b) => match (a.check(update), b.check(update)) {
                (Some(m), None) | (None, Some(m)) => Some(m),
                _ => None,
            },
            Filter::Not(inner) => match inner.check(update) {
                Some(_) => None,
                None => Some(Vec::new()),
            },
            Filter::Kind(kinds) => kinds.accepts(&update.kind).then(Vec::new),
            Filter::Custom(_, predicate) => predicate(update).then(Vec::new),
            Filter::Regex(regex) => {
                let text = message_of(update)?.text.as_deref()?;
                let captures = regex.captures(text)?;
                Some(vec![RegexMatch::from_captures(regex, &captures)])
            }
            leaf => {
                let message = message_of(update)?;
                leaf.check_message(message).then(Vec::new)
            }
        }
    }

    fn check_message(&self, message: &Message) -> bool {
        match self {
            Filter::All => true,
            Filter::Text => message.text.is_some(),
            Filter::Command => message.text.as_deref().is_some_and(|t| t.starts_with('/')),
            Filter::Caption => message.caption.is_some(),
            Filter::Reply => message.reply_to_message.is_some(),
            Filter::Private => message.chat.kind == ChatType::Private,
            Filter::Group => message.chat.is_group(),
            Filter::Channel => message.chat.kind == ChatType::Channel,
            Filter::Chat(ids) => ids.contains(&message.chat.id),
            Filter::User(ids) => message.from.as_ref().is_some_and(|u| ids.contains(&u.id)),
            Filter::Username(names) => message
                .from
                .as_ref()
                .and_then(|u| u.username.as_deref())
                .is_some_and(|n| names.contains(n)),
            _ => false,
        }
    }
}

/// Message-like payload only; callback queries do not count as messages here.
fn message_of(update: &Update) -> Option<&Message> {
    match &update.kind {
        UpdateKind::Message(m)
        | UpdateKind::EditedMessage(m)
        | UpdateKind::ChannelPost(m)
        | UpdateKind::EditedChannelPost(m) => Some(m),
        _ => None,
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("All"),
            Filter::Text => f.write_str("Text"),
            Filter::Command => f.write_str("Command"),
            Filter::Caption => f.write_str("Caption"),
            Filter::Reply => f.write_str("Reply"),
            Filter::Private => f.write_str("Private"),
            Filter::Group => f.write_str("Group"),
            Filter::Channel => f.write_str("Channel"),
            Filter::Regex(r) => write!(f, "Regex({})", r.as_str()),
            Filter::Chat(ids) => write!(f, "Chat({ids:?})"),
            Filter::User(ids) => write!(f, "User({ids:?})"),
            Filter::Username(names) => write!(f, "Username({names:?})"),
            Filter::Kind(k) => write!(f, "Kind({k:?})"),
            Filter::Custom(name, _) => write!(f, "Custom({name})"),
            Filter::And(a, b) => write!(f, "({a:?} & {b:?})"),
            Filter::Or(a, b) => write!(f, "({a:?} | {b:?})"),
            Filter::Xor(a, b) => write!(f, "({a:?} ^ {b:?})"),
            Filter::Not(inner) => write!(f, "!{inner:?}"),
        }
    }
}

impl BitAnd for Filter {
    type Output = Filter;

    fn bitand(self, rhs: Filter) -> Filter {
        Filter::And(Box::new(self), Box::new(rhs))
    }
}

impl BitOr for Filter {
    type Output = Filter;

    fn bitor(self, rhs: Filter) -> Filter {
        Filter::Or(Box::new(self), Box::new(rhs))
    }
}

impl BitXor for Filter {
    type Output = Filter;

    fn bitxor(self, rhs: Filter) -> Filter {
        Filter::Xor(Box::new(self), Box::new(rhs))
    }
}

impl Not for Filter {
    type Output = Filter;

    fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbot_core::{Chat, User};

    fn update(kind: UpdateKind) -> Update {
        Update::new(1, kind)
    }

    fn text_in(chat: Chat, text: &str) -> Update {
        update(UpdateKind::Message(
            Message::new(1, chat)
                .with_from(User::new(7, "Ann").with_username("ann"))
                .with_text(text),
        ))
    }

    #[test]
    fn test_leaves() {
        let private = text_in(Chat::new(7, ChatType::Private), "/start now");
        let group = text_in(Chat::new(-100, ChatType::Supergroup), "hello");

        assert!(Filter::Command.check(&private).is_some());
        assert!(Filter::Command.check(&group).is_none());
        assert!(Filter::Private.check(&private).is_some());
        assert!(Filter::Group.check(&group).is_some());
        assert!(Filter::chats([-100]).check(&group).is_some());
        assert!(Filter::users([7]).check(&group).is_some());
        assert!(Filter::usernames(["@ann"]).check(&group).is_some());
        assert!(Filter::Caption.check(&group).is_none());
        assert!(Filter::Reply.check(&group).is_none());
    }

    #[test]
    fn test_kind_filter() {
        let edited = update(UpdateKind::EditedMessage(Message::new(1, Chat::new(1, ChatType::Private))));

        assert!(Filter::Kind(UpdateKindFilter::Edited).check(&edited).is_some());
        assert!(Filter::Kind(UpdateKindFilter::Messages).check(&edited).is_some());
        assert!(Filter::Kind(UpdateKindFilter::Message).check(&edited).is_none());
        assert!(Filter::Kind(UpdateKindFilter::ChannelPosts).check(&edited).is_none());
    }

    /// **Test: And merges matches of both sides, Or keeps the matching side's, Not contributes none.**
    #[test]
    fn test_combinators_merge_matches() {
        let u = text_in(Chat::new(1, ChatType::Private), "order 66 now");
        let digits = Filter::regex(r"\d+").unwrap();
        let word = Filter::regex(r"(?P<w>now)").unwrap();

        let both = (digits.clone() & word.clone()).check(&u).unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].text, "66");
        assert_eq!(both[1].name("w"), Some("now"));

        let either = (Filter::regex("nope").unwrap() | word.clone()).check(&u).unwrap();
        assert_eq!(either.len(), 1);
        assert_eq!(either[0].text, "now");

        assert!((digits.clone() ^ word.clone()).check(&u).is_none());
        assert_eq!((digits ^ Filter::Caption).check(&u).unwrap().len(), 1);

        let negated = (!Filter::Caption).check(&u).unwrap();
        assert!(negated.is_empty());
        assert!((!word).check(&u).is_none());
    }

    #[test]
    fn test_non_message_updates_fail_message_leaves() {
        let poll_answer = update(UpdateKind::PollAnswer(dbot_core::PollAnswer {
            poll_id: "p".into(),
            user: None,
            option_ids: vec![0],
        }));

        assert!(Filter::All.check(&poll_answer).is_none());
        assert!((!Filter::All).check(&poll_answer).is_some());
        assert!(Filter::custom("always", |_| true).check(&poll_answer).is_some());
    }
}
