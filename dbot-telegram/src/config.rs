//! 运行配置：Telegram 接入、日志、dispatcher、updater 与限流。
//! 与外部交互：从环境变量加载，见 [`TelegramConfig::from_env`]。

use crate::options::{PollingOptions, WebhookOptions};
use anyhow::{bail, Context, Result};
use dbot_mq::MessageQueueConfig;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// `dbot` 启动一个 bot 所需的全部配置。
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub telegram_api_url: Option<String>,
    pub log_file: Option<String>,
    pub workers: usize,
    pub poll_interval: Duration,
    pub poll_timeout: Duration,
    /// 负数表示无限重试。
    pub bootstrap_retries: i32,
    pub bootstrap_interval: Duration,
    pub webhook_listen: String,
    pub webhook_port: u16,
    pub webhook_url_path: String,
    pub webhook_url: Option<String>,
    pub webhook_cert: Option<PathBuf>,
    pub webhook_key: Option<PathBuf>,
    pub mq_all_burst_limit: usize,
    pub mq_all_time_limit: Duration,
    pub mq_group_burst_limit: usize,
    pub mq_group_time_limit: Duration,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(name) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{name} is not valid: {raw}")),
        None => Ok(default),
    }
}

impl TelegramConfig {
    /// 从环境变量加载：BOT_TOKEN 必填，其余缺省时取 [`TelegramConfig::with_token`] 的默认值。
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// 同 [`TelegramConfig::from_env`]，但传入的 `token` 优先于 BOT_TOKEN。
    pub fn load(token: Option<String>) -> Result<Self> {
        let bot_token = token
            .filter(|t| !t.trim().is_empty())
            .or_else(|| var("BOT_TOKEN"))
            .context("BOT_TOKEN not set")?;
        let defaults = Self::with_token(bot_token);
        let config = Self {
            telegram_api_url: var("TELEGRAM_API_URL").or_else(|| var("TELOXIDE_API_URL")),
            log_file: var("LOG_FILE"),
            workers: parsed("DISPATCHER_WORKERS", defaults.workers)?,
            poll_interval: Duration::from_millis(parsed("POLL_INTERVAL_MS", 0)?),
            poll_timeout: Duration::from_secs(parsed("POLL_TIMEOUT_SECS", defaults.poll_timeout.as_secs())?),
            bootstrap_retries: parsed("BOOTSTRAP_RETRIES", defaults.bootstrap_retries)?,
            bootstrap_interval: Duration::from_millis(parsed("BOOTSTRAP_INTERVAL_MS", 5000)?),
            webhook_listen: var("WEBHOOK_LISTEN").unwrap_or_else(|| defaults.webhook_listen.clone()),
            webhook_port: parsed("WEBHOOK_PORT", defaults.webhook_port)?,
            webhook_url_path: var("WEBHOOK_URL_PATH").unwrap_or_default(),
            webhook_url: var("WEBHOOK_URL"),
            webhook_cert: var("WEBHOOK_CERT").map(PathBuf::from),
            webhook_key: var("WEBHOOK_KEY").map(PathBuf::from),
            mq_all_burst_limit: parsed("MQ_ALL_BURST_LIMIT", defaults.mq_all_burst_limit)?,
            mq_all_time_limit: Duration::from_millis(parsed("MQ_ALL_TIME_LIMIT_MS", 1000)?),
            mq_group_burst_limit: parsed("MQ_GROUP_BURST_LIMIT", defaults.mq_group_burst_limit)?,
            mq_group_time_limit: Duration::from_millis(parsed("MQ_GROUP_TIME_LIMIT_MS", 60_000)?),
            bot_token: defaults.bot_token,
        };
        config.validate()?;
        Ok(config)
    }

    /// 使用给定 token，其余配置取默认值。
    pub fn with_token(bot_token: String) -> Self {
        let mq = MessageQueueConfig::default();
        Self {
            bot_token,
            telegram_api_url: None,
            log_file: None,
            workers: dbot_dispatch::DEFAULT_WORKERS,
            poll_interval: Duration::ZERO,
            poll_timeout: Duration::from_secs(10),
            bootstrap_retries: 0,
            bootstrap_interval: Duration::from_secs(5),
            webhook_listen: "127.0.0.1".to_string(),
            webhook_port: 80,
            webhook_url_path: String::new(),
            webhook_url: None,
            webhook_cert: None,
            webhook_key: None,
            mq_all_burst_limit: mq.all_burst_limit,
            mq_all_time_limit: mq.all_time_limit,
            mq_group_burst_limit: mq.group_burst_limit,
            mq_group_time_limit: mq.group_time_limit,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            bail!("BOT_TOKEN is empty");
        }
        if let Some(url) = &self.telegram_api_url {
            reqwest::Url::parse(url).with_context(|| format!("TELEGRAM_API_URL is not a valid URL: {url}"))?;
        }
        if self.workers == 0 {
            bail!("DISPATCHER_WORKERS must be at least 1");
        }
        if self.mq_all_burst_limit == 0 || self.mq_group_burst_limit == 0 {
            bail!("message queue burst limits must be at least 1");
        }
        if self.webhook_cert.is_some() != self.webhook_key.is_some() {
            bail!("WEBHOOK_CERT and WEBHOOK_KEY must be set together");
        }
        Ok(())
    }

    pub fn polling_options(&self) -> PollingOptions {
        PollingOptions::default()
            .poll_interval(self.poll_interval)
            .timeout(self.poll_timeout)
            .bootstrap_retries(self.bootstrap_retries)
            .bootstrap_interval(self.bootstrap_interval)
    }

    pub fn webhook_options(&self) -> WebhookOptions {
        let mut options = WebhookOptions::default()
            .listen(self.webhook_listen.clone())
            .port(self.webhook_port)
            .url_path(self.webhook_url_path.clone())
            .bootstrap_retries(self.bootstrap_retries)
            .bootstrap_interval(self.bootstrap_interval);
        if let Some(url) = &self.webhook_url {
            options = options.webhook_url(url.clone());
        }
        if let (Some(cert), Some(key)) = (&self.webhook_cert, &self.webhook_key) {
            options = options.tls(cert.clone(), key.clone());
        }
        options
    }

    pub fn message_queue_config(&self) -> MessageQueueConfig {
        MessageQueueConfig::default()
            .all_limit(self.mq_all_burst_limit, self.mq_all_time_limit)
            .group_limit(self.mq_group_burst_limit, self.mq_group_time_limit)
    }
}
