//! polling 与 webhook 模式共用的启动步骤（getMe、删除 webhook、清理积压、设置 webhook），每一步都经 [`network_retry`] 重试。

use dbot_core::{ApiResult, Bot, GetUpdatesParams, SetWebhookParams};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Runs `attempt` until it succeeds, retrying transient failures `retries` times (forever when
/// negative) with `interval` between attempts. Auth errors are returned at once.
pub async fn network_retry<T, F, Fut>(description: &str, retries: i32, interval: Duration, mut attempt: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut failures: i64 = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                error!(step = description, error = %e, "Bootstrap step failed with a non-retryable error");
                return Err(e);
            }
            Err(e) => {
                failures += 1;
                if retries >= 0 && failures > i64::from(retries) {
                    error!(step = description, attempts = failures, error = %e, "Bootstrap step failed, giving up");
                    return Err(e);
                }
                warn!(step = description, attempt = failures, error = %e, "Bootstrap step failed, retrying");
                tokio::time::sleep(interval).await;
            }
        }
    }
}

/// What to do before updates start flowing.
#[derive(Debug, Clone)]
pub(crate) struct BootstrapPlan {
    pub delete_webhook: bool,
    pub clean: bool,
    pub set_webhook: Option<SetWebhookParams>,
    pub retries: i32,
    pub interval: Duration,
}

/// What bootstrap learned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Bootstrapped {
    /// Polling offset left after draining pending updates.
    pub offset: Option<i64>,
    pub username: Option<String>,
}

/// Executes `plan`, starting with `getMe` so the bot's username is known before any update.
#[instrument(skip_all, fields(clean = plan.clean, webhook = plan.set_webhook.is_some()))]
pub(crate) async fn bootstrap(bot: &dyn Bot, plan: &BootstrapPlan) -> ApiResult<Bootstrapped> {
    let (retries, interval) = (plan.retries, plan.interval);

    let me = network_retry("get me", retries, interval, || bot.get_me()).await?;
    info!(id = me.id, username = ?me.username, "step: bot identified");

    if plan.delete_webhook {
        network_retry("delete webhook", retries, interval, || bot.delete_webhook(false)).await?;
    }

    let mut offset = None;
    if plan.clean {
        let mut dropped = 0usize;
        loop {
            let params = GetUpdatesParams {
                offset,
                timeout: Duration::ZERO,
                ..GetUpdatesParams::default()
            };
            let updates = network_retry("drop pending updates", retries, interval, || bot.get_updates(params.clone())).await?;
            let Some(last) = updates.last() else { break };
            offset = Some(last.update_id + 1);
            dropped += updates.len();
        }
        info!(dropped, "step: pending updates dropped");
    }

    if let Some(params) = &plan.set_webhook {
        network_retry("set webhook", retries, interval, || bot.set_webhook(params.clone())).await?;
        info!(url = %params.url, "step: webhook set");
    }
    Ok(Bootstrapped {
        offset,
        username: me.username,
    })
}
