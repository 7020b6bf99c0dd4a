//! dbot CLI: run the demo Telegram bot by polling or as a webhook. Config from env and optional CLI args.

use anyhow::Result;
use clap::Parser;
use dbot_cli::{load_config, register_handlers, Cli, Commands, RunMode};
use dbot_telegram::Updater;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { token, mode } => {
            let config = load_config(token)?;
            match &config.log_file {
                Some(path) => dbot_core::init_tracing(path)?,
                None => dbot_core::init_console_tracing()?,
            }

            let updater = Updater::from_config(&config)?;
            register_handlers(updater.dispatcher())?;

            match mode {
                RunMode::Polling => updater.start_polling(config.polling_options()).await?,
                RunMode::Webhook => {
                    let addr = updater.start_webhook(config.webhook_options()).await?;
                    info!(%addr, "Webhook listening");
                }
            }
            info!(?mode, "Bot started, press Ctrl-C to stop");
            updater.idle().await?;
            Ok(())
        }
    }
}
