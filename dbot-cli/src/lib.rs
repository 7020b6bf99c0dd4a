//! # dbot-cli
//!
//! Argument parsing, config loading and the handlers of the `dbot` demo bot.

pub mod cli;
pub mod handlers;

pub use cli::{load_config, Cli, Commands, RunMode};
pub use dbot_telegram::TelegramConfig;
pub use handlers::register_handlers;
