//! # dbot-core
//!
//! Core types and traits for the update-dispatch framework: the [`Update`] model, the
//! [`TelegramError`] / [`DbotError`] taxonomy, the transport-facing [`Bot`] trait, and
//! tracing initialization. Transport-agnostic; used by dbot-dispatch, dbot-mq and dbot-telegram.

pub mod bot;
pub mod error;
pub mod logger;
pub mod types;

pub use bot::{Bot, GetUpdatesParams, SetWebhookParams};
pub use error::{ApiResult, DbotError, HandlerError, Result, TelegramError};
pub use logger::{init_console_tracing, init_tracing};
pub use types::{
    CallbackQuery, Chat, ChatType, ChosenInlineResult, InlineQuery, Message, Poll, PollAnswer,
    PollOption, PreCheckoutQuery, ShippingQuery, Update, UpdateKind, User,
};
