//! Wraps teloxide::Bot and implements [`dbot_core::Bot`]. Production code talks to Telegram through it; tests substitute another Bot impl.

use crate::adapters::{decode_update, http_error, telegram_error, ApiResponse, TelegramMessageWrapper, TelegramUserWrapper};
use async_trait::async_trait;
use dbot_core::{ApiResult, Bot as CoreBot, GetUpdatesParams, Message, SetWebhookParams, TelegramError, Update, User};
use serde_json::json;
use std::time::Duration;
use teloxide::payloads::setters::*;
use teloxide::prelude::*;
use teloxide::types::{AllowedUpdate, ChatId, InputFile, MessageId};
use tracing::debug;

/// Slack on top of the long-polling timeout before the HTTP request itself gives up.
const READ_SLACK: Duration = Duration::from_secs(5);

/// Thin wrapper around teloxide::Bot that implements dbot-core's Bot trait.
///
/// `getUpdates` is issued directly against the Bot API (with teloxide's client, URL and token)
/// so updates are decoded into the core model without a detour through teloxide's types.
#[derive(Clone)]
pub struct TelegramBotAdapter {
    bot: teloxide::Bot,
}

impl TelegramBotAdapter {
    /// Creates an adapter from an existing teloxide Bot.
    pub fn new(bot: teloxide::Bot) -> Self {
        Self { bot }
    }

    /// Builds a teloxide Bot for `token`, optionally against a self-hosted Bot API server.
    pub fn from_token(token: &str, api_url: Option<&str>) -> dbot_core::Result<Self> {
        let mut bot = teloxide::Bot::new(token);
        if let Some(url) = api_url {
            let url = reqwest::Url::parse(url)
                .map_err(|e| dbot_core::DbotError::Config(format!("invalid Telegram API URL {url}: {e}")))?;
            bot = bot.set_api_url(url);
        }
        Ok(Self { bot })
    }

    /// Returns the underlying teloxide::Bot for direct API use when needed.
    pub fn inner(&self) -> &teloxide::Bot {
        &self.bot
    }

    fn method_url(&self, method: &str) -> String {
        let base = self.bot.api_url();
        let base = base.as_str().trim_end_matches('/');
        format!("{base}/bot{}/{method}", self.bot.token())
    }
}

fn message_id(id: i64) -> ApiResult<MessageId> {
    i32::try_from(id)
        .map(MessageId)
        .map_err(|_| TelegramError::bad_request(format!("message id out of range: {id}")))
}

fn allowed_updates(kinds: &[String]) -> ApiResult<Vec<AllowedUpdate>> {
    kinds
        .iter()
        .map(|kind| {
            serde_json::from_value(json!(kind))
                .map_err(|_| TelegramError::bad_request(format!("unknown update kind: {kind}")))
        })
        .collect()
}

#[async_trait]
impl CoreBot for TelegramBotAdapter {
    async fn get_me(&self) -> ApiResult<User> {
        let me = self.bot.get_me().await.map_err(telegram_error)?;
        Ok(TelegramUserWrapper(&me.user).to_core())
    }

    async fn get_updates(&self, params: GetUpdatesParams) -> ApiResult<Vec<Update>> {
        let mut body = json!({ "timeout": params.timeout.as_secs() });
        if let Some(offset) = params.offset {
            body["offset"] = json!(offset);
        }
        if let Some(limit) = params.limit {
            body["limit"] = json!(limit);
        }
        if let Some(kinds) = &params.allowed_updates {
            body["allowed_updates"] = json!(kinds);
        }

        let response = self
            .bot
            .client()
            .post(self.method_url("getUpdates"))
            .timeout(params.timeout + READ_SLACK)
            .json(&body)
            .send()
            .await
            .map_err(http_error)?;
        let envelope: ApiResponse<Vec<serde_json::Value>> = response.json().await.map_err(http_error)?;
        let updates: Vec<Update> = envelope.into_result()?.into_iter().filter_map(decode_update).collect();
        debug!(count = updates.len(), offset = ?params.offset, "getUpdates");
        Ok(updates)
    }

    async fn set_webhook(&self, params: SetWebhookParams) -> ApiResult<()> {
        let url = reqwest::Url::parse(&params.url)
            .map_err(|e| TelegramError::bad_request(format!("invalid webhook URL {}: {e}", params.url)))?;
        let mut request = self.bot.set_webhook(url).drop_pending_updates(params.drop_pending_updates);
        if let Some(path) = params.certificate {
            request = request.certificate(InputFile::file(path));
        }
        if let Some(max) = params.max_connections {
            request = request.max_connections(max);
        }
        if let Some(kinds) = &params.allowed_updates {
            request = request.allowed_updates(allowed_updates(kinds)?);
        }
        request.await.map_err(telegram_error)?;
        Ok(())
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> ApiResult<()> {
        self.bot
            .delete_webhook()
            .drop_pending_updates(drop_pending_updates)
            .await
            .map_err(telegram_error)?;
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> ApiResult<Message> {
        let sent = self
            .bot
            .send_message(ChatId(chat_id), text.to_string())
            .await
            .map_err(telegram_error)?;
        Ok(TelegramMessageWrapper(&sent).to_core())
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> ApiResult<()> {
        self.bot
            .edit_message_text(ChatId(chat_id), self::message_id(message_id)?, text)
            .await
            .map_err(telegram_error)?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> ApiResult<()> {
        self.bot
            .delete_message(ChatId(chat_id), self::message_id(message_id)?)
            .await
            .map_err(telegram_error)?;
        Ok(())
    }
}
