//! `Bot` wrapper that sends message traffic through a [`MessageQueue`].

use crate::message_queue::MessageQueue;
use async_trait::async_trait;
use dbot_core::{ApiResult, Bot, GetUpdatesParams, Message, SetWebhookParams, TelegramError, Update, User};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Rate-limited [`Bot`]. `send_message`, `edit_message_text` and `delete_message` wait for a
/// slot in the message queue (the group limiter too when `chat_id < 0`); every other call goes
/// straight to the wrapped bot.
pub struct ThrottledBot<B> {
    bot: Arc<B>,
    queue: Arc<MessageQueue>,
}

impl<B: Bot + 'static> ThrottledBot<B> {
    pub fn new(bot: B, queue: MessageQueue) -> Self {
        Self::shared(bot, Arc::new(queue))
    }

    /// Uses a queue the caller keeps a handle to, e.g. to stop it on shutdown.
    pub fn shared(bot: B, queue: Arc<MessageQueue>) -> Self {
        Self { bot: Arc::new(bot), queue }
    }

    pub fn inner(&self) -> &B {
        &self.bot
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    async fn throttled<T, F, Fut>(&self, chat_id: i64, call: F) -> ApiResult<T>
    where
        F: FnOnce(Arc<B>) -> Fut,
        Fut: Future<Output = ApiResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let request = call(self.bot.clone());
        self.queue
            .enqueue(
                async move {
                    let _ = tx.send(request.await);
                    Ok(())
                },
                chat_id < 0,
            )
            .map_err(|e| TelegramError::network(e.to_string()))?;
        debug!(chat_id, "Request queued");
        rx.await
            .map_err(|_| TelegramError::network("message queue dropped the request"))?
    }
}

#[async_trait]
impl<B: Bot + 'static> Bot for ThrottledBot<B> {
    async fn get_me(&self) -> ApiResult<User> {
        self.bot.get_me().await
    }

    async fn get_updates(&self, params: GetUpdatesParams) -> ApiResult<Vec<Update>> {
        self.bot.get_updates(params).await
    }

    async fn set_webhook(&self, params: SetWebhookParams) -> ApiResult<()> {
        self.bot.set_webhook(params).await
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> ApiResult<()> {
        self.bot.delete_webhook(drop_pending_updates).await
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> ApiResult<Message> {
        let text = text.to_string();
        self.throttled(chat_id, move |bot| async move { bot.send_message(chat_id, &text).await })
            .await
    }

    async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> ApiResult<()> {
        let text = text.to_string();
        self.throttled(chat_id, move |bot| async move {
            bot.edit_message_text(chat_id, message_id, &text).await
        })
        .await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> ApiResult<()> {
        self.throttled(chat_id, move |bot| async move { bot.delete_message(chat_id, message_id).await })
            .await
    }
}
