//! Update source driving a [`Dispatcher`]: long polling or a webhook server, plus the
//! lifecycle of the dispatcher and the job queue.

use crate::bootstrap::{bootstrap, BootstrapPlan};
use crate::bot_adapter::TelegramBotAdapter;
use crate::config::TelegramConfig;
use crate::options::{PollingOptions, WebhookOptions};
use crate::webhook;
use dbot_core::{Bot, DbotError, GetUpdatesParams, Result, SetWebhookParams, TelegramError};
use dbot_dispatch::{Dispatcher, JobQueue, DEFAULT_WORKERS};
use dbot_mq::{MessageQueue, ThrottledBot};
use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Added to the server's `retry_after` before polling again.
const RETRY_AFTER_SLACK: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const POLL_LIMIT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Polling,
    Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterState {
    Idle,
    Bootstrapping,
    Running(Mode),
    Stopping,
}

/// One polling or webhook session.
struct Run {
    cancel: CancellationToken,
    driver: Option<JoinHandle<()>>,
}

struct Inner {
    bot: Arc<dyn Bot>,
    dispatcher: Dispatcher,
    job_queue: JobQueue,
    message_queue: Option<Arc<MessageQueue>>,
    state: Mutex<UpdaterState>,
    run: Mutex<Option<Run>>,
    last_error: Mutex<Option<TelegramError>>,
}

pub struct UpdaterBuilder {
    bot: Arc<dyn Bot>,
    workers: usize,
    stop_timeout: Option<Duration>,
    job_queue: Option<JobQueue>,
    message_queue: Option<Arc<MessageQueue>>,
}

impl UpdaterBuilder {
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Bound on how long `stop()` waits for the dispatcher to drain.
    #[must_use]
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = Some(timeout);
        self
    }

    /// Uses this job queue instead of a fresh one (e.g. one with a pinned clock).
    #[must_use]
    pub fn job_queue(mut self, job_queue: JobQueue) -> Self {
        self.job_queue = Some(job_queue);
        self
    }

    /// Message queue stopped, after the dispatcher, by `Updater::stop`.
    #[must_use]
    pub fn message_queue(mut self, queue: Arc<MessageQueue>) -> Self {
        self.message_queue = Some(queue);
        self
    }

    pub fn build(self) -> Updater {
        let job_queue = self.job_queue.unwrap_or_default();
        let mut dispatcher = Dispatcher::builder(self.bot.clone())
            .workers(self.workers)
            .job_queue(job_queue.clone());
        if let Some(timeout) = self.stop_timeout {
            dispatcher = dispatcher.stop_timeout(timeout);
        }
        Updater {
            inner: Arc::new(Inner {
                bot: self.bot,
                dispatcher: dispatcher.build(),
                job_queue,
                message_queue: self.message_queue,
                state: Mutex::new(UpdaterState::Idle),
                run: Mutex::new(None),
                last_error: Mutex::new(None),
            }),
        }
    }
}

/// Cloneable handle; all clones control the same updater.
///
/// State machine: `Idle → Bootstrapping → Running(mode) → Stopping → Idle`. Only one mode can be
/// active; starting while not idle is a [`DbotError::Config`].
#[derive(Clone)]
pub struct Updater {
    inner: Arc<Inner>,
}

impl Updater {
    pub fn builder(bot: Arc<dyn Bot>) -> UpdaterBuilder {
        UpdaterBuilder {
            bot,
            workers: DEFAULT_WORKERS,
            stop_timeout: None,
            job_queue: None,
            message_queue: None,
        }
    }

    pub fn new(bot: Arc<dyn Bot>) -> Self {
        Self::builder(bot).build()
    }

    /// Telegram-backed updater whose outgoing messages go through a rate-limited queue.
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: &TelegramConfig) -> Result<Self> {
        let adapter = TelegramBotAdapter::from_token(&config.bot_token, config.telegram_api_url.as_deref())?;
        let queue = Arc::new(MessageQueue::new(config.message_queue_config()));
        let bot: Arc<dyn Bot> = Arc::new(ThrottledBot::shared(adapter, queue.clone()));
        Ok(Self::builder(bot)
            .workers(config.workers)
            .message_queue(queue)
            .build())
    }

    pub fn bot(&self) -> &Arc<dyn Bot> {
        &self.inner.bot
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    pub fn job_queue(&self) -> &JobQueue {
        &self.inner.job_queue
    }

    pub fn state(&self) -> UpdaterState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), UpdaterState::Running(_))
    }

    /// The error that terminated the last polling session, if any.
    pub fn last_error(&self) -> Option<TelegramError> {
        self.inner.last_error.lock().clone()
    }

    /// Moves `Idle → Bootstrapping` and registers a fresh session token.
    fn begin(&self) -> Result<CancellationToken> {
        let mut state = self.inner.state.lock();
        if *state != UpdaterState::Idle {
            return Err(DbotError::Config(format!("updater is not idle ({:?})", *state)));
        }
        *state = UpdaterState::Bootstrapping;
        let cancel = CancellationToken::new();
        *self.inner.run.lock() = Some(Run {
            cancel: cancel.clone(),
            driver: None,
        });
        *self.inner.last_error.lock() = None;
        Ok(cancel)
    }

    /// Back to `Idle` after a failed start, unless `stop()` already took over.
    fn abort(&self) {
        let mut state = self.inner.state.lock();
        if *state == UpdaterState::Bootstrapping {
            *state = UpdaterState::Idle;
            self.inner.run.lock().take();
        }
    }

    /// Starts the job queue and the dispatcher, spawns the driver and enters `Running(mode)`.
    fn launch(&self, mode: Mode, driver: impl FnOnce() -> JoinHandle<()>) -> Result<()> {
        let mut state = self.inner.state.lock();
        if *state != UpdaterState::Bootstrapping {
            return Err(DbotError::Config("updater stopped during bootstrap".to_string()));
        }
        if let Err(e) = self.inner.job_queue.start() {
            *state = UpdaterState::Idle;
            self.inner.run.lock().take();
            return Err(e);
        }
        self.inner.dispatcher.start();
        if let Some(run) = self.inner.run.lock().as_mut() {
            run.driver = Some(driver());
        }
        *state = UpdaterState::Running(mode);
        Ok(())
    }

    /// Bootstraps and hands the bot's username to the dispatcher; returns the polling offset.
    async fn bootstrap_or_cancel(&self, plan: &BootstrapPlan, cancel: &CancellationToken) -> Result<Option<i64>> {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(DbotError::Config("updater stopped during bootstrap".to_string())),
            r = bootstrap(self.inner.bot.as_ref(), plan) => r.map_err(DbotError::from),
        };
        match outcome {
            Ok(done) => {
                if let Some(username) = &done.username {
                    self.inner.dispatcher.set_bot_username(username);
                }
                Ok(done.offset)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    /// Bootstraps (webhook removal, optional clean), then polls `getUpdates` in the background.
    ///
    /// The loop pushes updates in `update_id` order and advances the offset past each one.
    /// `TimedOut` retries at once, `RetryAfter` waits as told, `InvalidToken` ends the session
    /// (see [`Updater::last_error`]); every other error goes to the dispatcher's error handlers
    /// and the next poll backs off.
    #[instrument(skip(self, options), fields(timeout = ?options.timeout, clean = options.clean))]
    pub async fn start_polling(&self, options: PollingOptions) -> Result<()> {
        let cancel = self.begin()?;
        info!("step: bootstrapping polling");
        let plan = BootstrapPlan {
            delete_webhook: true,
            clean: options.clean,
            set_webhook: None,
            retries: options.bootstrap_retries,
            interval: options.bootstrap_interval,
        };
        let offset = self.bootstrap_or_cancel(&plan, &cancel).await?;

        let inner = self.inner.clone();
        self.launch(Mode::Polling, move || tokio::spawn(poll_loop(inner, options, offset, cancel)))?;
        info!("step: polling started");
        Ok(())
    }

    /// Binds the webhook server, registers its URL (and certificate) with Telegram and starts
    /// serving. Returns the bound address; port 0 picks a free one.
    #[instrument(skip(self, options), fields(listen = %options.listen, port = options.port))]
    pub async fn start_webhook(&self, options: WebhookOptions) -> Result<SocketAddr> {
        if options.cert.is_some() != options.key.is_some() {
            return Err(DbotError::Config("webhook cert and key must be given together".to_string()));
        }
        #[cfg(not(feature = "tls"))]
        if options.cert.is_some() {
            return Err(DbotError::Config(
                "serving the webhook over TLS needs the `tls` feature".to_string(),
            ));
        }

        let cancel = self.begin()?;
        let addr = if options.listen.contains(':') {
            format!("[{}]:{}", options.listen, options.port)
        } else {
            format!("{}:{}", options.listen, options.port)
        };
        let (listener, local) = match webhook::bind(&addr).await {
            Ok(bound) => bound,
            Err(e) => {
                self.abort();
                return Err(e);
            }
        };
        info!(%local, "step: webhook listener bound");

        #[cfg(feature = "tls")]
        let acceptor = match (&options.cert, &options.key) {
            (Some(cert), Some(key)) => match webhook::tls::acceptor(cert, key) {
                Ok(acceptor) => Some(acceptor),
                Err(e) => {
                    self.abort();
                    return Err(e);
                }
            },
            _ => None,
        };

        let url = options.public_url(local.port());
        let plan = BootstrapPlan {
            delete_webhook: options.clean,
            clean: options.clean,
            set_webhook: Some(SetWebhookParams {
                url,
                certificate: options.cert.clone(),
                max_connections: Some(options.max_connections),
                allowed_updates: options.allowed_updates.clone(),
                drop_pending_updates: false,
            }),
            retries: options.bootstrap_retries,
            interval: options.bootstrap_interval,
        };
        self.bootstrap_or_cancel(&plan, &cancel).await?;

        let app = webhook::webhook_router(&options.route(), self.inner.dispatcher.update_queue());
        self.launch(Mode::Webhook, move || {
            #[cfg(feature = "tls")]
            if let Some(acceptor) = acceptor {
                return webhook::tls::serve_tls(listener, acceptor, app, cancel);
            }
            webhook::serve(listener, app, cancel)
        })?;
        info!(%local, route = %options.route(), "step: webhook started");
        Ok(local)
    }

    /// Stops the update source, then the job queue, then drains and stops the dispatcher and the
    /// message queue. Idempotent; concurrent callers return once the first one is underway.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            match *state {
                UpdaterState::Idle | UpdaterState::Stopping => return,
                _ => *state = UpdaterState::Stopping,
            }
        }
        info!("step: updater stopping");

        let run = self.inner.run.lock().take();
        if let Some(Run { cancel, driver }) = run {
            cancel.cancel();
            if let Some(driver) = driver {
                if let Err(e) = driver.await {
                    warn!(error = %e, "Update source task ended abnormally");
                }
            }
        }
        self.inner.job_queue.stop().await;
        self.inner.dispatcher.stop().await;
        if let Some(queue) = &self.inner.message_queue {
            queue.stop(Some(Duration::from_secs(5))).await;
        }

        *self.inner.state.lock() = UpdaterState::Idle;
        info!("step: updater stopped");
    }

    /// Waits for SIGINT or SIGTERM (Ctrl+C off unix), or for the session to end on its own,
    /// then stops.
    pub async fn idle(&self) -> Result<()> {
        self.idle_with(|| async {}).await
    }

    /// Like [`Updater::idle`], running `hook` between the signal and `stop()`.
    pub async fn idle_with<F, Fut>(&self, hook: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let session = self.inner.run.lock().as_ref().map(|run| run.cancel.clone());
        let session_ended = async move {
            match session {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            signal = shutdown_signal() => {
                let signal = signal?;
                info!(signal, "Received signal, stopping updater");
            }
            _ = session_ended => warn!(error = ?self.last_error(), "Update source ended, stopping updater"),
        }
        hook().await;
        self.stop().await;
        Ok(())
    }
}

async fn shutdown_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => Ok("SIGINT"),
            _ = sigterm.recv() => Ok("SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("Ctrl+C")
    }
}

fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        Duration::from_secs(1)
    } else {
        current.mul_f64(1.5).min(MAX_BACKOFF)
    }
}

async fn poll_loop(inner: Arc<Inner>, options: PollingOptions, mut offset: Option<i64>, cancel: CancellationToken) {
    let queue = inner.dispatcher.update_queue();
    let mut backoff = Duration::ZERO;

    loop {
        let params = GetUpdatesParams {
            offset,
            limit: Some(POLL_LIMIT),
            timeout: options.timeout,
            allowed_updates: options.allowed_updates.clone(),
        };
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = inner.bot.get_updates(params) => result,
        };

        let pause = match result {
            Ok(updates) if updates.is_empty() => {
                backoff = Duration::ZERO;
                options.poll_interval
            }
            Ok(updates) => {
                backoff = Duration::ZERO;
                debug!(count = updates.len(), "Polled updates");
                for update in updates {
                    offset = Some(update.update_id + 1);
                    if let Err(e) = queue.push(update) {
                        error!(error = %e, "Update queue closed, polling stops");
                        cancel.cancel();
                        return;
                    }
                }
                Duration::ZERO
            }
            Err(TelegramError::TimedOut) => {
                debug!("getUpdates timed out");
                Duration::ZERO
            }
            Err(TelegramError::RetryAfter(wait)) => {
                warn!(retry_after = ?wait, "Flood control hit while polling");
                wait + RETRY_AFTER_SLACK
            }
            Err(e) if e.is_fatal() => {
                error!(error = %e, "Polling stopped by a fatal error");
                *inner.last_error.lock() = Some(e);
                cancel.cancel();
                return;
            }
            Err(e) => {
                backoff = next_backoff(backoff);
                warn!(error = %e, backoff = ?backoff, "Polling failed, backing off");
                inner.dispatcher.dispatch_error(None, DbotError::Telegram(e)).await;
                backoff
            }
        };

        if !pause.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }
    debug!("Polling loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Duration::ZERO;
        let mut seen = Vec::new();
        for _ in 0..12 {
            backoff = next_backoff(backoff);
            seen.push(backoff);
        }
        assert_eq!(seen[0], Duration::from_secs(1));
        assert_eq!(seen[1], Duration::from_millis(1500));
        assert_eq!(seen[2], Duration::from_millis(2250));
        assert_eq!(*seen.last().unwrap(), MAX_BACKOFF);
    }
}
