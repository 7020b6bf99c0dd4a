//! `dbot` 示例 bot 的 handler：`/start`、`/remind <secs>`，以及对普通文本的回显。

use dbot_core::{HandlerError, Result};
use dbot_dispatch::{
    Callback, CallbackContext, CommandHandler, Dispatcher, ErrorCallback, Event, Filter, MessageHandler,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const GREETING: &str = "Hi! I repeat what you say. Try /remind <seconds>.";
pub const REMIND_USAGE: &str = "Usage: /remind <seconds>";
pub const REMINDER_TEXT: &str = "Reminder!";

pub fn register_handlers(dispatcher: &Dispatcher) -> Result<()> {
    dispatcher.add_handler(Arc::new(CommandHandler::new(["start"], Callback::new(start))?), 0);
    dispatcher.add_handler(Arc::new(CommandHandler::new(["remind"], Callback::new(remind))?), 0);
    dispatcher.add_handler(
        Arc::new(MessageHandler::new(Filter::Text & !Filter::Command, Callback::new(echo))),
        0,
    );
    dispatcher.add_error_handler(ErrorCallback::new(log_error), false);
    Ok(())
}

async fn start(event: Event, context: CallbackContext) -> Result<()> {
    if let Some(chat_id) = event.chat_id() {
        context.bot().send_message(chat_id, GREETING).await?;
    }
    Ok(())
}

async fn remind(event: Event, context: CallbackContext) -> Result<()> {
    let Some(chat_id) = event.chat_id() else {
        return Ok(());
    };
    let seconds = context
        .args()
        .and_then(|args| args.first())
        .and_then(|arg| arg.parse::<u64>().ok());
    let Some(seconds) = seconds else {
        context.bot().send_message(chat_id, REMIND_USAGE).await?;
        return Ok(());
    };
    let job_queue = context
        .job_queue()
        .ok_or_else(|| HandlerError::State("no job queue attached".to_string()))?;

    job_queue
        .run_once(send_reminder, Duration::from_secs(seconds), Some("reminder"))
        .with_context(chat_id);
    info!(chat_id, seconds, "Reminder scheduled");
    context
        .bot()
        .send_message(chat_id, &format!("Reminding you in {seconds}s."))
        .await?;
    Ok(())
}

async fn send_reminder(context: CallbackContext) -> Result<()> {
    let chat_id = context
        .job()
        .and_then(|job| job.context_as::<i64>())
        .ok_or_else(|| HandlerError::State("reminder without chat".to_string()))?;
    context.bot().send_message(*chat_id, REMINDER_TEXT).await?;
    Ok(())
}

async fn echo(event: Event, context: CallbackContext) -> Result<()> {
    let text = event
        .update()
        .and_then(|update| update.effective_message())
        .and_then(|message| message.text.as_deref());
    if let (Some(chat_id), Some(text)) = (event.chat_id(), text) {
        context.bot().send_message(chat_id, text).await?;
    }
    Ok(())
}

async fn log_error(event: Option<Event>, context: CallbackContext) -> Result<()> {
    let update_id = event.as_ref().and_then(Event::update_id);
    match context.error() {
        Some(e) => error!(?update_id, error = %e, "Update caused an error"),
        None => error!(?update_id, "Error handler called without an error"),
    }
    Ok(())
}
