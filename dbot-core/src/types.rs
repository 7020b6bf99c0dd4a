//! Update model: the inbound event and the payloads it can carry.
//!
//! Only the fields the dispatch core reads are modelled. Unknown JSON fields are ignored, and
//! update kinds this crate does not know about deserialize to [`UpdateKind::Unknown`] so the
//! polling offset can still move past them.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// User or bot account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl User {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self {
            id,
            is_bot: false,
            first_name: first_name.into(),
            last_name: None,
            username: None,
        }
    }

    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Supergroup,
    Channel,
    #[serde(other)]
    Unknown,
}

/// Chat (private, group, supergroup or channel) identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChatType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Chat {
    pub fn new(id: i64, kind: ChatType) -> Self {
        Self {
            id,
            kind,
            title: None,
            username: None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, ChatType::Group | ChatType::Supergroup)
    }
}

/// A message, edited message or channel post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    /// Unix time the message was sent.
    #[serde(default)]
    pub date: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<Box<Message>>,
}

impl Message {
    pub fn new(message_id: i64, chat: Chat) -> Self {
        Self {
            message_id,
            date: 0,
            chat,
            from: None,
            text: None,
            caption: None,
            reply_to_message: None,
        }
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: User) -> Self {
        self.from = Some(from);
        self
    }

    #[must_use]
    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    /// Text if present, otherwise caption.
    pub fn text_or_caption(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Box<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_message_id: Option<String>,
    #[serde(default)]
    pub chat_instance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub offset: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenInlineResult {
    pub result_id: String,
    pub from: User,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub invoice_payload: String,
    #[serde(default)]
    pub shipping_address: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub total_amount: i64,
    #[serde(default)]
    pub invoice_payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    #[serde(default)]
    pub voter_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub total_voter_count: i64,
    #[serde(default)]
    pub is_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollAnswer {
    pub poll_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default)]
    pub option_ids: Vec<i32>,
}

/// The single payload an [`Update`] carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKind {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    EditedChannelPost(Message),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
    ChosenInlineResult(ChosenInlineResult),
    ShippingQuery(ShippingQuery),
    PreCheckoutQuery(PreCheckoutQuery),
    Poll(Poll),
    PollAnswer(PollAnswer),
    /// A kind newer than this crate; carries the JSON key it arrived under.
    Unknown(String),
}

impl UpdateKind {
    /// Telegram field name of this kind (also the `allowed_updates` name).
    pub fn name(&self) -> &str {
        match self {
            UpdateKind::Message(_) => "message",
            UpdateKind::EditedMessage(_) => "edited_message",
            UpdateKind::ChannelPost(_) => "channel_post",
            UpdateKind::EditedChannelPost(_) => "edited_channel_post",
            UpdateKind::CallbackQuery(_) => "callback_query",
            UpdateKind::InlineQuery(_) => "inline_query",
            UpdateKind::ChosenInlineResult(_) => "chosen_inline_result",
            UpdateKind::ShippingQuery(_) => "shipping_query",
            UpdateKind::PreCheckoutQuery(_) => "pre_checkout_query",
            UpdateKind::Poll(_) => "poll",
            UpdateKind::PollAnswer(_) => "poll_answer",
            UpdateKind::Unknown(name) => name,
        }
    }
}

/// One inbound event. `update_id` increases monotonically and is the polling offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    pub kind: UpdateKind,
}

impl Update {
    pub fn new(update_id: i64, kind: UpdateKind) -> Self {
        Self { update_id, kind }
    }

    pub fn kind_name(&self) -> &str {
        self.kind.name()
    }

    /// The message-like payload: message, edited message, channel post, edited channel post,
    /// or the message a callback query is attached to.
    pub fn effective_message(&self) -> Option<&Message> {
        match &self.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => Some(m),
            UpdateKind::CallbackQuery(q) => q.message.as_deref(),
            _ => None,
        }
    }

    pub fn effective_chat(&self) -> Option<&Chat> {
        self.effective_message().map(|m| &m.chat)
    }

    pub fn effective_user(&self) -> Option<&User> {
        match &self.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => m.from.as_ref(),
            UpdateKind::CallbackQuery(q) => Some(&q.from),
            UpdateKind::InlineQuery(q) => Some(&q.from),
            UpdateKind::ChosenInlineResult(r) => Some(&r.from),
            UpdateKind::ShippingQuery(q) => Some(&q.from),
            UpdateKind::PreCheckoutQuery(q) => Some(&q.from),
            UpdateKind::PollAnswer(a) => a.user.as_ref(),
            UpdateKind::Poll(_) | UpdateKind::Unknown(_) => None,
        }
    }
}

impl Serialize for Update {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("update_id", &self.update_id)?;
        match &self.kind {
            UpdateKind::Message(m)
            | UpdateKind::EditedMessage(m)
            | UpdateKind::ChannelPost(m)
            | UpdateKind::EditedChannelPost(m) => map.serialize_entry(self.kind.name(), m)?,
            UpdateKind::CallbackQuery(q) => map.serialize_entry("callback_query", q)?,
            UpdateKind::InlineQuery(q) => map.serialize_entry("inline_query", q)?,
            UpdateKind::ChosenInlineResult(r) => map.serialize_entry("chosen_inline_result", r)?,
            UpdateKind::ShippingQuery(q) => map.serialize_entry("shipping_query", q)?,
            UpdateKind::PreCheckoutQuery(q) => map.serialize_entry("pre_checkout_query", q)?,
            UpdateKind::Poll(p) => map.serialize_entry("poll", p)?,
            UpdateKind::PollAnswer(a) => map.serialize_entry("poll_answer", a)?,
            UpdateKind::Unknown(_) => {}
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawUpdate {
    update_id: i64,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl<'de> Deserialize<'de> for Update {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawUpdate::deserialize(deserializer)?;
        let unknown = raw.rest.keys().next().cloned().unwrap_or_default();

        for (key, value) in raw.rest {
            let kind = match key.as_str() {
                "message" => UpdateKind::Message(payload(value)?),
                "edited_message" => UpdateKind::EditedMessage(payload(value)?),
                "channel_post" => UpdateKind::ChannelPost(payload(value)?),
                "edited_channel_post" => UpdateKind::EditedChannelPost(payload(value)?),
                "callback_query" => UpdateKind::CallbackQuery(payload(value)?),
                "inline_query" => UpdateKind::InlineQuery(payload(value)?),
                "chosen_inline_result" => UpdateKind::ChosenInlineResult(payload(value)?),
                "shipping_query" => UpdateKind::ShippingQuery(payload(value)?),
                "pre_checkout_query" => UpdateKind::PreCheckoutQuery(payload(value)?),
                "poll" => UpdateKind::Poll(payload(value)?),
                "poll_answer" => UpdateKind::PollAnswer(payload(value)?),
                _ => continue,
            };
            return Ok(Update::new(raw.update_id, kind));
        }

        Ok(Update::new(raw.update_id, UpdateKind::Unknown(unknown)))
    }
}

fn payload<T, E>(value: serde_json::Value) -> Result<T, E>
where
    T: serde::de::DeserializeOwned,
    E: serde::de::Error,
{
    serde_json::from_value(value).map_err(E::custom)
}
