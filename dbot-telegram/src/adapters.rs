//! Conversions from teloxide types and errors to dbot_core ones, plus decoding of raw Bot API
//! responses.

use dbot_core::{Chat, ChatType, Message, TelegramError, Update, UpdateKind, User};
use serde::Deserialize;
use std::time::Duration;
use teloxide::{ApiError, RequestError};
use tracing::warn;

/// Wraps a teloxide User for conversion to core [`User`].
pub struct TelegramUserWrapper<'a>(pub &'a teloxide::types::User);

impl TelegramUserWrapper<'_> {
    pub fn to_core(&self) -> User {
        User {
            id: self.0.id.0 as i64,
            is_bot: self.0.is_bot,
            first_name: self.0.first_name.clone(),
            last_name: self.0.last_name.clone(),
            username: self.0.username.clone(),
        }
    }
}

/// Wraps a teloxide Message for conversion to core [`Message`]. The replied-to message is
/// converted one level deep.
pub struct TelegramMessageWrapper<'a>(pub &'a teloxide::types::Message);

impl TelegramMessageWrapper<'_> {
    pub fn to_core(&self) -> Message {
        let mut message = self.shallow();
        message.reply_to_message = self
            .0
            .reply_to_message()
            .map(|reply| Box::new(TelegramMessageWrapper(reply).shallow()));
        message
    }

    fn shallow(&self) -> Message {
        let msg = self.0;
        let mut chat = Chat::new(msg.chat.id.0, chat_type(&msg.chat));
        chat.title = msg.chat.title().map(str::to_string);
        chat.username = msg.chat.username().map(str::to_string);

        let mut message = Message::new(msg.id.0 as i64, chat);
        message.date = msg.date.timestamp();
        message.from = msg.from.as_ref().map(|u| TelegramUserWrapper(u).to_core());
        message.text = msg.text().map(str::to_string);
        message.caption = msg.caption().map(str::to_string);
        message
    }
}

fn chat_type(chat: &teloxide::types::Chat) -> ChatType {
    if chat.is_private() {
        ChatType::Private
    } else if chat.is_group() {
        ChatType::Group
    } else if chat.is_supergroup() {
        ChatType::Supergroup
    } else if chat.is_channel() {
        ChatType::Channel
    } else {
        ChatType::Unknown
    }
}

/// Classifies a teloxide request failure.
pub fn telegram_error(err: RequestError) -> TelegramError {
    match err {
        RequestError::Api(ApiError::InvalidToken) => TelegramError::InvalidToken,
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => TelegramError::conflict(
            "Conflict: terminated by other getUpdates request; make sure that only one bot instance is running",
        ),
        RequestError::Api(ApiError::BotBlocked) => TelegramError::unauthorized("Forbidden: bot was blocked by the user"),
        RequestError::Api(api) => TelegramError::bad_request(api.to_string()),
        RequestError::MigrateToChatId(chat_id) => TelegramError::ChatMigrated(chat_id.0),
        RequestError::RetryAfter(seconds) => TelegramError::RetryAfter(seconds.duration()),
        RequestError::Network(e) if e.is_timeout() => TelegramError::TimedOut,
        other => TelegramError::network(other.to_string()),
    }
}

/// Classifies a transport-level reqwest failure.
pub fn http_error(err: reqwest::Error) -> TelegramError {
    if err.is_timeout() {
        TelegramError::TimedOut
    } else {
        TelegramError::network(err.to_string())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    migrate_to_chat_id: Option<i64>,
    retry_after: Option<u64>,
}

/// Bot API response envelope: `{"ok": .., "result": .., "description": .., "error_code": ..}`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

impl<T> ApiResponse<T> {
    pub fn into_result(self) -> Result<T, TelegramError> {
        let description = self.description.unwrap_or_else(|| "Unknown HTTP error".to_string());
        let parameters = self.parameters.unwrap_or_default();
        if let Some(chat_id) = parameters.migrate_to_chat_id {
            return Err(TelegramError::ChatMigrated(chat_id));
        }
        if let Some(seconds) = parameters.retry_after {
            return Err(TelegramError::RetryAfter(Duration::from_secs(seconds)));
        }
        match (self.ok, self.result) {
            (true, Some(result)) => Ok(result),
            (true, None) => Err(TelegramError::network("response without result")),
            (false, _) => Err(match self.error_code {
                Some(401) | Some(404) => TelegramError::InvalidToken,
                Some(403) => TelegramError::unauthorized(&description),
                Some(400) => TelegramError::bad_request(&description),
                Some(409) => TelegramError::conflict(&description),
                Some(502) => TelegramError::network("Bad Gateway"),
                Some(code) => TelegramError::network(format!("{description} ({code})")),
                None => TelegramError::network(&description),
            }),
        }
    }
}

/// Decodes one entry of a `getUpdates` result. An entry the update model cannot read still
/// yields its `update_id`, as an [`UpdateKind::Unknown`], so the offset can move past it.
pub fn decode_update(value: serde_json::Value) -> Option<Update> {
    let update_id = value.get("update_id").and_then(serde_json::Value::as_i64)?;
    let kind = value
        .as_object()
        .and_then(|map| map.keys().find(|k| k.as_str() != "update_id").cloned())
        .unwrap_or_default();
    match serde_json::from_value::<Update>(value) {
        Ok(update) => Some(update),
        Err(e) => {
            warn!(update_id, kind = %kind, error = %e, "Undecodable update, skipping payload");
            Some(Update::new(update_id, UpdateKind::Unknown(kind)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Test: TelegramUserWrapper converts teloxide User to core User with correct id, username, first_name, last_name.**
    #[test]
    fn test_telegram_user_wrapper_to_core() {
        let user = teloxide::types::User {
            id: teloxide::types::UserId(123),
            is_bot: false,
            first_name: "Test".to_string(),
            last_name: Some("User".to_string()),
            username: Some("testuser".to_string()),
            language_code: Some("en".to_string()),
            is_premium: false,
            added_to_attachment_menu: false,
        };

        let core_user = TelegramUserWrapper(&user).to_core();

        assert_eq!(core_user.id, 123);
        assert_eq!(core_user.username, Some("testuser".to_string()));
        assert_eq!(core_user.first_name, "Test");
        assert_eq!(core_user.last_name, Some("User".to_string()));
        assert!(!core_user.is_bot);
    }

    fn envelope(value: serde_json::Value) -> Result<Vec<serde_json::Value>, TelegramError> {
        serde_json::from_value::<ApiResponse<Vec<serde_json::Value>>>(value)
            .unwrap()
            .into_result()
    }

    /// **Test: error envelopes map onto the transport taxonomy.**
    #[test]
    fn test_api_response_errors() {
        assert_eq!(
            envelope(json!({"ok": false, "error_code": 401, "description": "Unauthorized"})),
            Err(TelegramError::InvalidToken)
        );
        assert_eq!(
            envelope(json!({"ok": false, "error_code": 429, "description": "Too Many Requests",
                            "parameters": {"retry_after": 3}})),
            Err(TelegramError::RetryAfter(Duration::from_secs(3)))
        );
        assert_eq!(
            envelope(json!({"ok": false, "error_code": 400, "description": "Bad Request: group chat was upgraded",
                            "parameters": {"migrate_to_chat_id": -1001}})),
            Err(TelegramError::ChatMigrated(-1001))
        );
        assert_eq!(
            envelope(json!({"ok": false, "error_code": 400, "description": "Bad Request: chat not found"})),
            Err(TelegramError::BadRequest("Chat not found".to_string()))
        );
        assert_eq!(
            envelope(json!({"ok": false, "error_code": 409, "description": "Conflict: webhook is active"})),
            Err(TelegramError::Conflict("Conflict: webhook is active".to_string()))
        );
        assert_eq!(envelope(json!({"ok": true, "result": []})), Ok(Vec::new()));
    }

    #[test]
    fn test_decode_update_keeps_id_of_broken_payload() {
        let update = decode_update(json!({"update_id": 5, "message": {"chat": 1}})).unwrap();
        assert_eq!(update.update_id, 5);
        assert_eq!(update.kind, UpdateKind::Unknown("message".to_string()));

        assert!(decode_update(json!({"message": {}})).is_none());
    }
}
