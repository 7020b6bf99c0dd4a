//! Bot abstraction: the narrow slice of the Bot API the dispatch core talks to.
//!
//! [`Bot`] trait is transport-agnostic; `dbot-telegram` implements it via teloxide, tests substitute mocks.

use crate::error::ApiResult;
use crate::types::{Message, Update, User};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Arguments of a `getUpdates` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetUpdatesParams {
    /// First update id to return; everything below it is confirmed and dropped by the server.
    pub offset: Option<i64>,
    pub limit: Option<u8>,
    /// Long-polling timeout; zero means short polling.
    pub timeout: Duration,
    /// Update kinds to receive (Telegram field names). `None` keeps the server-side setting.
    pub allowed_updates: Option<Vec<String>>,
}

/// Arguments of a `setWebhook` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetWebhookParams {
    pub url: String,
    /// Public key certificate to upload, for self-signed setups.
    pub certificate: Option<PathBuf>,
    pub max_connections: Option<u8>,
    pub allowed_updates: Option<Vec<String>>,
    pub drop_pending_updates: bool,
}

impl SetWebhookParams {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Bot API methods used by the updater, the handlers and the rate limiter.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Returns the bot's own account.
    async fn get_me(&self) -> ApiResult<User>;
    /// Fetches pending updates in increasing `update_id` order.
    async fn get_updates(&self, params: GetUpdatesParams) -> ApiResult<Vec<Update>>;
    async fn set_webhook(&self, params: SetWebhookParams) -> ApiResult<()>;
    async fn delete_webhook(&self, drop_pending_updates: bool) -> ApiResult<()>;
    /// Sends a text message and returns it as the server stored it.
    async fn send_message(&self, chat_id: i64, text: &str) -> ApiResult<Message>;
    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> ApiResult<()>;
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> ApiResult<()>;
}

#[async_trait]
impl<B: Bot + ?Sized> Bot for Arc<B> {
    async fn get_me(&self) -> ApiResult<User> {
        (**self).get_me().await
    }

    async fn get_updates(&self, params: GetUpdatesParams) -> ApiResult<Vec<Update>> {
        (**self).get_updates(params).await
    }

    async fn set_webhook(&self, params: SetWebhookParams) -> ApiResult<()> {
        (**self).set_webhook(params).await
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> ApiResult<()> {
        (**self).delete_webhook(drop_pending_updates).await
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> ApiResult<Message> {
        (**self).send_message(chat_id, text).await
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> ApiResult<()> {
        (**self).edit_message_text(chat_id, message_id, text).await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> ApiResult<()> {
        (**self).delete_message(chat_id, message_id).await
    }
}
