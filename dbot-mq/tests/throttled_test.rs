//! [`dbot_mq::ThrottledBot`] against a recording bot.

use async_trait::async_trait;
use dbot_core::{
    ApiResult, Bot, Chat, ChatType, GetUpdatesParams, Message, SetWebhookParams, TelegramError, Update, User,
};
use dbot_mq::{MessageQueue, MessageQueueConfig, ThrottledBot};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct RecordingBot {
    sent: Mutex<Vec<(i64, String, Instant)>>,
}

#[async_trait]
impl Bot for RecordingBot {
    async fn get_me(&self) -> ApiResult<User> {
        Ok(User::new(1, "recorder"))
    }

    async fn get_updates(&self, _params: GetUpdatesParams) -> ApiResult<Vec<Update>> {
        Ok(Vec::new())
    }

    async fn set_webhook(&self, _params: SetWebhookParams) -> ApiResult<()> {
        Ok(())
    }

    async fn delete_webhook(&self, _drop_pending_updates: bool) -> ApiResult<()> {
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> ApiResult<Message> {
        if text.is_empty() {
            return Err(TelegramError::bad_request("Bad Request: message text is empty"));
        }
        let mut sent = self.sent.lock();
        sent.push((chat_id, text.to_string(), Instant::now()));
        let kind = if chat_id < 0 { ChatType::Group } else { ChatType::Private };
        Ok(Message::new(sent.len() as i64, Chat::new(chat_id, kind)).with_text(text))
    }

    async fn edit_message_text(&self, _chat_id: i64, _message_id: i64, _text: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> ApiResult<()> {
        Ok(())
    }
}

fn throttled(group_burst: usize) -> ThrottledBot<RecordingBot> {
    ThrottledBot::new(
        RecordingBot::default(),
        MessageQueue::new(
            MessageQueueConfig::default()
                .all_limit(30, Duration::from_millis(1000))
                .group_limit(group_burst, Duration::from_millis(1000)),
        ),
    )
}

/// **Test: a throttled send returns the wrapped bot's result.**
#[tokio::test(start_paused = true)]
async fn test_send_passes_result_through() {
    let bot = throttled(20);

    let message = bot.send_message(42, "hello").await.unwrap();
    assert_eq!(message.chat.id, 42);
    assert_eq!(message.text.as_deref(), Some("hello"));

    let err = bot.send_message(42, "").await.unwrap_err();
    assert_eq!(err, TelegramError::BadRequest("Message text is empty".to_string()));

    assert_eq!(bot.get_me().await.unwrap().id, 1);
}

/// **Test: group chats are held back by the group limiter.**
///
/// **Setup:** group limit 1 per second.
/// **Action:** two messages to a group, then one to a private chat.
/// **Expected:** the second group message goes out one second after the first; the private one is not delayed.
#[tokio::test(start_paused = true)]
async fn test_group_messages_are_throttled() {
    let bot = Arc::new(throttled(1));
    let start = Instant::now();

    let first = bot.clone();
    let second = bot.clone();
    let (a, b) = tokio::join!(
        async move { first.send_message(-100, "one").await },
        async move { second.send_message(-100, "two").await },
    );
    a.unwrap();
    b.unwrap();
    bot.send_message(7, "private").await.unwrap();

    let sent = bot.inner().sent.lock();
    let at = |text: &str| sent.iter().find(|(_, t, _)| t == text).map(|(_, _, i)| *i - start);
    assert_eq!(at("one"), Some(Duration::ZERO));
    assert_eq!(at("two"), Some(Duration::from_millis(1000)));
    assert_eq!(at("private"), Some(Duration::from_millis(1000)));
}
