//! CLI 解析与配置加载。

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dbot_telegram::TelegramConfig;

#[derive(Parser)]
#[command(name = "dbot")]
#[command(about = "Telegram Bot CLI", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the Telegram bot (config from env; token can override BOT_TOKEN).
    Run {
        #[arg(short, long)]
        token: Option<String>,
        /// How updates are received.
        #[arg(short, long, value_enum, default_value_t = RunMode::Polling)]
        mode: RunMode,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Long-poll getUpdates.
    Polling,
    /// Serve WEBHOOK_* settings and register the URL with Telegram.
    Webhook,
}

/// 从环境变量加载 TelegramConfig；若提供 `token` 则覆盖 BOT_TOKEN。
pub fn load_config(token: Option<String>) -> Result<TelegramConfig> {
    TelegramConfig::load(token)
}
