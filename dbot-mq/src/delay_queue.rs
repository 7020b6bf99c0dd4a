//! Single-consumer queue releasing tasks at a bounded rate.

use dbot_core::{DbotError, HandlerError, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const DEFAULT_BURST_LIMIT: usize = 30;
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct DelayQueueConfig {
    /// Maximum releases inside any window of `time_limit`.
    pub burst_limit: usize,
    pub time_limit: Duration,
    pub name: String,
    /// Start the consumer from `DelayQueue::new`. Requires a tokio runtime.
    pub autostart: bool,
}

impl Default for DelayQueueConfig {
    fn default() -> Self {
        Self {
            burst_limit: DEFAULT_BURST_LIMIT,
            time_limit: DEFAULT_TIME_LIMIT,
            name: "delay-queue".to_string(),
            autostart: true,
        }
    }
}

impl DelayQueueConfig {
    #[must_use]
    pub fn burst_limit(mut self, burst_limit: usize) -> Self {
        self.burst_limit = burst_limit;
        self
    }

    #[must_use]
    pub fn time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }
}

type Task = BoxFuture<'static, Result<()>>;
type ErrorRoute = Arc<dyn Fn(DbotError) + Send + Sync>;

enum Item {
    Task(Task),
    Stop,
}

/// Cloneable sending side of a [`DelayQueue`].
#[derive(Clone)]
pub struct DelayQueueHandle {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Item>,
}

impl DelayQueueHandle {
    /// Appends `task`; it runs once the rate limit allows. Fails after the queue has stopped.
    pub fn enqueue<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tx
            .send(Item::Task(Box::pin(task)))
            .map_err(|_| HandlerError::State(format!("delay queue {} is stopped", self.name)).into())
    }
}

/// Rate limiter with its own consumer task.
///
/// Tasks run one at a time, in FIFO order. A failing or panicking task is reported to the error
/// route (logged by default) and the queue moves on.
pub struct DelayQueue {
    config: DelayQueueConfig,
    handle: DelayQueueHandle,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Item>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    error_route: Arc<RwLock<ErrorRoute>>,
}

impl DelayQueue {
    pub fn new(config: DelayQueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let name: Arc<str> = Arc::from(config.name.as_str());
        let route_name = name.clone();
        let default_route: ErrorRoute = Arc::new(move |err: DbotError| {
            error!(queue = %route_name, error = %err, "Delayed task failed");
        });
        let queue = Self {
            handle: DelayQueueHandle { name, tx },
            rx: Mutex::new(Some(rx)),
            consumer: Mutex::new(None),
            error_route: Arc::new(RwLock::new(default_route)),
            config,
        };
        if queue.config.autostart {
            queue.start();
        }
        queue
    }

    /// Replaces the callback receiving errors of failed tasks.
    #[must_use]
    pub fn with_error_route(self, route: impl Fn(DbotError) + Send + Sync + 'static) -> Self {
        *self.error_route.write() = Arc::new(route);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn handle(&self) -> DelayQueueHandle {
        self.handle.clone()
    }

    pub fn enqueue<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.handle.enqueue(task)
    }

    /// Spawns the consumer. A queue runs at most once; later calls do nothing.
    pub fn start(&self) {
        let Some(rx) = self.rx.lock().take() else {
            debug!(queue = %self.config.name, "Delay queue already started");
            return;
        };
        let consumer = tokio::spawn(consume(
            rx,
            self.config.clone(),
            self.error_route.clone(),
        ));
        *self.consumer.lock() = Some(consumer);
        info!(
            queue = %self.config.name,
            burst_limit = self.config.burst_limit,
            time_limit_ms = self.config.time_limit.as_millis() as u64,
            "step: delay queue started"
        );
    }

    /// Lets the consumer finish what was queued before this call, waiting at most `timeout`
    /// (forever when `None`); on timeout the consumer is aborted.
    pub async fn stop(&self, timeout: Option<Duration>) {
        let _ = self.handle.tx.send(Item::Stop);
        let consumer = self.consumer.lock().take();
        let Some(mut consumer) = consumer else {
            return;
        };
        match timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, &mut consumer).await.is_err() {
                    warn!(queue = %self.config.name, "Delay queue did not drain in time, aborting");
                    consumer.abort();
                }
            }
            None => {
                let _ = consumer.await;
            }
        }
        info!(queue = %self.config.name, "step: delay queue stopped");
    }

    pub fn is_alive(&self) -> bool {
        self.consumer
            .lock()
            .as_ref()
            .is_some_and(|consumer| !consumer.is_finished())
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<Item>,
    config: DelayQueueConfig,
    error_route: Arc<RwLock<ErrorRoute>>,
) {
    let burst_limit = config.burst_limit.max(1);
    let mut released: VecDeque<Instant> = VecDeque::with_capacity(burst_limit);

    while let Some(item) = rx.recv().await {
        let task = match item {
            Item::Task(task) => task,
            Item::Stop => break,
        };

        prune(&mut released, config.time_limit);
        while released.len() >= burst_limit {
            if let Some(oldest) = released.front().copied() {
                tokio::time::sleep_until(oldest + config.time_limit).await;
            }
            prune(&mut released, config.time_limit);
        }
        released.push_back(Instant::now());

        let outcome = AssertUnwindSafe(task).catch_unwind().await;
        let err = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(_) => HandlerError::Panicked(format!("task in delay queue {} panicked", config.name)).into(),
        };
        let route = error_route.read().clone();
        route(err);
    }
    debug!(queue = %config.name, "Delay queue consumer exited");
}

/// Forgets releases that have left the window ending now.
fn prune(released: &mut VecDeque<Instant>, window: Duration) {
    let now = Instant::now();
    while released.front().is_some_and(|&t| t + window <= now) {
        released.pop_front();
    }
}
