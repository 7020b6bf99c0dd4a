//! # dbot-telegram
//!
//! Telegram side of dbot: the teloxide-backed [`dbot_core::Bot`] implementation, the
//! [`Updater`] feeding a dispatcher from long polling or a webhook server, and env config.

mod adapters;
mod bootstrap;
mod bot_adapter;
mod config;
mod options;
mod updater;
mod webhook;

pub use adapters::{telegram_error, TelegramMessageWrapper, TelegramUserWrapper};
pub use bootstrap::network_retry;
pub use bot_adapter::TelegramBotAdapter;
pub use config::TelegramConfig;
pub use options::{PollingOptions, WebhookOptions};
pub use updater::{Mode, Updater, UpdaterBuilder, UpdaterState};
pub use webhook::webhook_router;
