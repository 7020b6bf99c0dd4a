//! Shared fixtures: a scripted Bot recording every transport call, and update builders.

#![allow(dead_code)]

use async_trait::async_trait;
use dbot_core::{
    ApiResult, Bot, Chat, ChatType, GetUpdatesParams, Message, SetWebhookParams, TelegramError, Update, UpdateKind,
    User,
};
use dbot_dispatch::{Callback, Event, TypeHandler};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Bot whose `getUpdates` replies come from a script. Once the script runs out, polls behave
/// like an idle long poll: they wait out the timeout (at least 10 ms) and return nothing.
#[derive(Default)]
pub struct ScriptedBot {
    script: Mutex<VecDeque<ApiResult<Vec<Update>>>>,
    delete_failures: Mutex<VecDeque<TelegramError>>,
    pub polls: Mutex<Vec<(GetUpdatesParams, tokio::time::Instant)>>,
    pub webhooks: Mutex<Vec<SetWebhookParams>>,
    pub deletes: AtomicUsize,
}

impl ScriptedBot {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, result: ApiResult<Vec<Update>>) -> &Self {
        self.script.lock().push_back(result);
        self
    }

    /// The next `deleteWebhook` calls fail with these errors, in order.
    pub fn fail_deletes(&self, errors: impl IntoIterator<Item = TelegramError>) {
        self.delete_failures.lock().extend(errors);
    }

    pub fn offsets(&self) -> Vec<Option<i64>> {
        self.polls.lock().iter().map(|(p, _)| p.offset).collect()
    }
}

#[async_trait]
impl Bot for ScriptedBot {
    async fn get_me(&self) -> ApiResult<User> {
        Ok(User::new(1, "Test Bot").with_username("test_bot"))
    }

    async fn get_updates(&self, params: GetUpdatesParams) -> ApiResult<Vec<Update>> {
        let timeout = params.timeout;
        self.polls.lock().push((params, tokio::time::Instant::now()));
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => result,
            None => {
                tokio::time::sleep(timeout.max(Duration::from_millis(10))).await;
                Ok(Vec::new())
            }
        }
    }

    async fn set_webhook(&self, params: SetWebhookParams) -> ApiResult<()> {
        self.webhooks.lock().push(params);
        Ok(())
    }

    async fn delete_webhook(&self, _drop_pending_updates: bool) -> ApiResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        match self.delete_failures.lock().pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> ApiResult<Message> {
        Ok(Message::new(1, Chat::new(chat_id, ChatType::Private)).with_text(text))
    }

    async fn edit_message_text(&self, _chat_id: i64, _message_id: i64, _text: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> ApiResult<()> {
        Ok(())
    }
}

pub fn text_update(update_id: i64, text: &str) -> Update {
    let message = Message::new(update_id, Chat::new(7, ChatType::Private))
        .with_from(User::new(10, "Tester"))
        .with_text(text);
    Update::new(update_id, UpdateKind::Message(message))
}

/// Handler recording the id of every update it sees.
pub fn id_recorder(seen: &Arc<Mutex<Vec<i64>>>) -> Arc<TypeHandler<Update>> {
    let seen = seen.clone();
    Arc::new(TypeHandler::<Update>::new(Callback::new(move |event: Event, _| {
        let seen = seen.clone();
        async move {
            if let Some(id) = event.update_id() {
                seen.lock().push(id);
            }
            Ok(())
        }
    })))
}
