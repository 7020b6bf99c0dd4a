//! Shared fixtures: a Bot that never talks to the network and update builders.

#![allow(dead_code)]

use async_trait::async_trait;
use dbot_core::{
    ApiResult, Bot, Chat, ChatType, GetUpdatesParams, Message, SetWebhookParams, Update, UpdateKind, User,
};
use dbot_dispatch::{Dispatcher, Event};
use std::sync::Arc;

pub struct NullBot;

#[async_trait]
impl Bot for NullBot {
    async fn get_me(&self) -> ApiResult<User> {
        Ok(User::new(1, "Test Bot").with_username("test_bot"))
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
        Ok(Message::new(1, Chat::new(chat_id, ChatType::Private)).with_text(text))
    }

    async fn edit_message_text(&self, _chat_id: i64, _message_id: i64, _text: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn delete_message(&self, _chat_id: i64, _message_id: i64) -> ApiResult<()> {
        Ok(())
    }
}

pub fn dispatcher() -> Dispatcher {
    Dispatcher::new(Arc::new(NullBot))
}

/// Text message from user 10 in chat `chat_id`.
pub fn text_update(update_id: i64, chat_id: i64, text: &str) -> Event {
    let kind = if chat_id < 0 { ChatType::Group } else { ChatType::Private };
    let message = Message::new(update_id, Chat::new(chat_id, kind))
        .with_from(User::new(10, "Tester").with_username("tester"))
        .with_text(text);
    Update::new(update_id, UpdateKind::Message(message)).into()
}
