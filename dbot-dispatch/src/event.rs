//! What flows through the update queue.

use dbot_core::Update;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// One unit of work for the dispatcher.
///
/// Most events are Bot API updates. `Text` carries synthetic string commands injected by
/// application code, and `Custom` carries arbitrary values matched by [`crate::TypeHandler`].
#[derive(Clone)]
pub enum Event {
    Update(Arc<Update>),
    Text(String),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl Event {
    pub fn custom<T: Any + Send + Sync>(value: T) -> Self {
        Event::Custom(Arc::new(value))
    }

    pub fn update(&self) -> Option<&Update> {
        match self {
            Event::Update(u) => Some(u),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Event::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn update_id(&self) -> Option<i64> {
        self.update().map(|u| u.update_id)
    }

    /// The payload as `Any`: the `Update`, the `String`, or the custom value.
    pub fn as_any(&self) -> &dyn Any {
        match self {
            Event::Update(u) => u.as_ref(),
            Event::Text(s) => s,
            Event::Custom(v) => v.as_ref(),
        }
    }

    /// Chat id used to pick the per-chat store.
    pub fn chat_id(&self) -> Option<i64> {
        self.update().and_then(|u| u.effective_chat()).map(|c| c.id)
    }

    /// User id used to pick the per-user store.
    pub fn user_id(&self) -> Option<i64> {
        self.update().and_then(|u| u.effective_user()).map(|u| u.id)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Update(u) => f
                .debug_struct("Update")
                .field("update_id", &u.update_id)
                .field("kind", &u.kind_name())
                .finish(),
            Event::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Event::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<Update> for Event {
    fn from(update: Update) -> Self {
        Event::Update(Arc::new(update))
    }
}

impl From<Arc<Update>> for Event {
    fn from(update: Arc<Update>) -> Self {
        Event::Update(update)
    }
}

impl From<String> for Event {
    fn from(text: String) -> Self {
        Event::Text(text)
    }
}

impl From<&str> for Event {
    fn from(text: &str) -> Self {
        Event::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbot_core::{Chat, ChatType, Message, UpdateKind, User};

    #[test]
    fn test_as_any_exposes_payload() {
        let update = Update::new(
            3,
            UpdateKind::Message(Message::new(1, Chat::new(-5, ChatType::Group)).with_from(User::new(9, "U"))),
        );
        let event = Event::from(update);

        assert!(event.as_any().is::<Update>());
        assert_eq!(event.update_id(), Some(3));
        assert_eq!(event.chat_id(), Some(-5));
        assert_eq!(event.user_id(), Some(9));

        assert!(Event::from("/start").as_any().is::<String>());
        assert!(Event::custom(42u32).as_any().is::<u32>());
    }
}
