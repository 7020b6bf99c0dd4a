//! # Dispatcher
//!
//! Owns the update queue, the handler groups and the worker pool. Each event is offered to every
//! group in ascending order; inside a group the first handler whose `check_update` passes handles
//! it and the event moves on to the next group. A callback returning
//! [`DbotError::StopPropagation`] ends processing of that event.
//!
//! Callback failures and panics never escape: they are handed to the error handlers, or logged
//! when there are none.

use crate::callback::ErrorCallback;
use crate::context::{CallbackContext, DataStore};
use crate::event::Event;
use crate::handler::Handler;
use crate::job_queue::JobQueue;
use dashmap::DashMap;
use dbot_core::{Bot, DbotError, HandlerError, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

enum QueueItem {
    Event(Event),
    Shutdown,
}

/// Sending side of the dispatcher's update queue.
#[derive(Clone)]
pub struct UpdateQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl UpdateQueue {
    /// Enqueues an event behind everything already queued.
    pub fn push(&self, event: impl Into<Event>) -> Result<()> {
        self.tx
            .send(QueueItem::Event(event.into()))
            .map_err(|_| HandlerError::State("update queue closed".to_string()).into())
    }
}

type HandlerGroups = BTreeMap<i32, Vec<Arc<dyn Handler>>>;

/// Lowercased bot username without the leading `@`, shared with handlers that need it.
pub(crate) type SharedUsername = Arc<RwLock<Option<String>>>;

struct Inner {
    bot: Arc<dyn Bot>,
    workers: usize,
    stop_timeout: Duration,
    queue_tx: mpsc::UnboundedSender<QueueItem>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<QueueItem>>>,
    groups: RwLock<HandlerGroups>,
    bot_username: SharedUsername,
    error_handlers: RwLock<Vec<(ErrorCallback, bool)>>,
    bot_data: DataStore,
    chat_data: DashMap<i64, DataStore>,
    user_data: DashMap<i64, DataStore>,
    job_queue: RwLock<Option<JobQueue>>,
    async_tasks: TaskTracker,
    async_permits: Arc<Semaphore>,
    running: AtomicBool,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Cloneable handle; all clones drive the same dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

/// Non-owning handle, held by the job queue.
#[derive(Clone)]
pub(crate) struct WeakDispatcher(Weak<Inner>);

impl WeakDispatcher {
    pub(crate) fn upgrade(&self) -> Option<Dispatcher> {
        self.0.upgrade().map(|inner| Dispatcher { inner })
    }
}

pub struct DispatcherBuilder {
    bot: Arc<dyn Bot>,
    workers: usize,
    stop_timeout: Duration,
    job_queue: Option<JobQueue>,
}

impl DispatcherBuilder {
    /// Worker count; also bounds concurrent `run_async` work. Zero is treated as one.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Upper bound on how long `stop()` waits for workers and async work.
    #[must_use]
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    #[must_use]
    pub fn job_queue(mut self, job_queue: JobQueue) -> Self {
        self.job_queue = Some(job_queue);
        self
    }

    pub fn build(self) -> Dispatcher {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher {
            inner: Arc::new(Inner {
                bot: self.bot,
                workers: self.workers,
                stop_timeout: self.stop_timeout,
                queue_tx,
                queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
                groups: RwLock::new(BTreeMap::new()),
                bot_username: Arc::new(RwLock::new(None)),
                error_handlers: RwLock::new(Vec::new()),
                bot_data: DataStore::new(),
                chat_data: DashMap::new(),
                user_data: DashMap::new(),
                job_queue: RwLock::new(None),
                async_tasks: TaskTracker::new(),
                async_permits: Arc::new(Semaphore::new(self.workers)),
                running: AtomicBool::new(false),
                worker_handles: Mutex::new(Vec::new()),
            }),
        };
        if let Some(job_queue) = self.job_queue {
            dispatcher.set_job_queue(job_queue);
        }
        dispatcher
    }
}

impl Dispatcher {
    pub fn builder(bot: Arc<dyn Bot>) -> DispatcherBuilder {
        DispatcherBuilder {
            bot,
            workers: DEFAULT_WORKERS,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            job_queue: None,
        }
    }

    pub fn new(bot: Arc<dyn Bot>) -> Self {
        Self::builder(bot).build()
    }

    pub(crate) fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher(Arc::downgrade(&self.inner))
    }

    pub fn bot(&self) -> &Arc<dyn Bot> {
        &self.inner.bot
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Records the bot's own username, as reported by `getMe`. Commands addressed to another
    /// bot (`/start@other_bot`) are ignored from then on.
    pub fn set_bot_username(&self, username: impl AsRef<str>) {
        let username = username.as_ref().trim_start_matches('@').to_lowercase();
        debug!(%username, "Bot username set");
        *self.inner.bot_username.write() = Some(username);
    }

    pub fn bot_username(&self) -> Option<String> {
        self.inner.bot_username.read().clone()
    }

    pub(crate) fn shared_username(&self) -> SharedUsername {
        self.inner.bot_username.clone()
    }

    pub fn update_queue(&self) -> UpdateQueue {
        UpdateQueue {
            tx: self.inner.queue_tx.clone(),
        }
    }

    pub fn job_queue(&self) -> Option<JobQueue> {
        self.inner.job_queue.read().clone()
    }

    /// Attaches `job_queue` and points it back at this dispatcher.
    pub fn set_job_queue(&self, job_queue: JobQueue) {
        job_queue.set_dispatcher(self);
        *self.inner.job_queue.write() = Some(job_queue);
    }

    pub fn bot_data(&self) -> DataStore {
        self.inner.bot_data.clone()
    }

    /// Store for `chat_id`, created on first use.
    pub fn chat_data(&self, chat_id: i64) -> DataStore {
        self.inner.chat_data.entry(chat_id).or_default().clone()
    }

    /// Store for `user_id`, created on first use.
    pub fn user_data(&self, user_id: i64) -> DataStore {
        self.inner.user_data.entry(user_id).or_default().clone()
    }

    /// Appends `handler` to `group`. Takes effect for the next event processed.
    pub fn add_handler(&self, handler: Arc<dyn Handler>, group: i32) {
        debug!(group, handler = handler.name(), "Adding handler");
        handler.attach(self);
        self.inner.groups.write().entry(group).or_default().push(handler);
    }

    /// Removes `handler` (by identity) from `group`; drops the group once empty.
    pub fn remove_handler(&self, handler: &Arc<dyn Handler>, group: i32) -> bool {
        let mut groups = self.inner.groups.write();
        let Some(handlers) = groups.get_mut(&group) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            groups.remove(&group);
        }
        removed
    }

    /// Registers an error handler. With `run_async` it runs on the async pool and cannot stop
    /// propagation.
    pub fn add_error_handler(&self, callback: ErrorCallback, run_async: bool) {
        let mut handlers = self.inner.error_handlers.write();
        if handlers.iter().any(|(cb, _)| cb.ptr_eq(&callback)) {
            debug!("The callback is already registered as an error handler. Ignoring.");
            return;
        }
        handlers.push((callback, run_async));
    }

    pub fn remove_error_handler(&self, callback: &ErrorCallback) -> bool {
        let mut handlers = self.inner.error_handlers.write();
        let before = handlers.len();
        handlers.retain(|(cb, _)| !cb.ptr_eq(callback));
        handlers.len() != before
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Spawns the worker pool. Calling it on a running dispatcher only logs a warning.
    #[instrument(skip(self), fields(workers = self.inner.workers))]
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            warn!("Dispatcher already running");
            return;
        }
        let mut handles = self.inner.worker_handles.lock();
        for id in 0..self.inner.workers {
            let dispatcher = self.clone();
            handles.push(tokio::spawn(async move { dispatcher.worker_loop(id).await }));
        }
        info!("step: dispatcher started");
    }

    /// Drains what is already queued, then stops the workers and waits (bounded) for pending
    /// async work. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("step: dispatcher stopping");
        let handles = std::mem::take(&mut *self.inner.worker_handles.lock());
        // One marker per live worker; a surplus marker would end a worker of the next start().
        for _ in handles.iter().filter(|h| !h.is_finished()) {
            let _ = self.inner.queue_tx.send(QueueItem::Shutdown);
        }
        let workers_done = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.inner.stop_timeout, workers_done).await.is_err() {
            warn!(timeout = ?self.inner.stop_timeout, "Workers did not finish in time");
        }

        self.inner.async_tasks.close();
        if tokio::time::timeout(self.inner.stop_timeout, self.inner.async_tasks.wait())
            .await
            .is_err()
        {
            warn!(pending = self.inner.async_tasks.len(), "Async tasks still running after stop");
        }
        self.inner.async_tasks.reopen();
        info!("step: dispatcher stopped");
    }

    async fn worker_loop(&self, id: usize) {
        debug!(worker = id, "Worker started");
        loop {
            let item = {
                let mut rx = self.inner.queue_rx.lock().await;
                rx.recv().await
            };
            match item {
                Some(QueueItem::Event(event)) => {
                    let update_id = event.update_id();
                    if let Err(panic) = AssertUnwindSafe(self.process_update(event)).catch_unwind().await {
                        error!(worker = id, ?update_id, error = %panicked(panic), "Event processing panicked");
                    }
                }
                Some(QueueItem::Shutdown) | None => break,
            }
        }
        debug!(worker = id, "Worker stopped");
    }

    /// Runs one event through the handler groups.
    pub async fn process_update(&self, event: Event) {
        let groups: Vec<(i32, Vec<Arc<dyn Handler>>)> = self
            .inner
            .groups
            .read()
            .iter()
            .map(|(group, handlers)| (*group, handlers.clone()))
            .collect();
        let update_id = event.update_id();

        for (group, handlers) in groups {
            let checked = std::panic::catch_unwind(AssertUnwindSafe(|| {
                handlers
                    .iter()
                    .find_map(|h| h.check_update(&event).map(|outcome| (h.clone(), outcome)))
            }));
            let (handler, outcome) = match checked {
                Ok(Some(found)) => found,
                Ok(None) => continue,
                Err(panic) => {
                    warn!(?update_id, group, "Handler check panicked");
                    if self.dispatch_error(Some(event.clone()), panicked(panic)).await {
                        break;
                    }
                    continue;
                }
            };

            debug!(?update_id, group, handler = handler.name(), "step: handler matched");
            let context = CallbackContext::from_event(&event, self, handler.options().needs);
            let result = AssertUnwindSafe(handler.handle_update(event.clone(), self, outcome, context))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(panicked(panic)));

            match result {
                Ok(()) => {}
                Err(DbotError::StopPropagation) => {
                    debug!(?update_id, group, "Stopping further handlers");
                    break;
                }
                Err(err) => {
                    if self.dispatch_error(Some(event.clone()), err).await {
                        debug!(?update_id, group, "Error handler stopped further handlers");
                        break;
                    }
                }
            }
        }
    }

    /// Runs `future` on the async pool; at most `workers` such futures run at once.
    ///
    /// Errors (and panics) are routed to the error handlers with `event` attached.
    /// `StopPropagation` has no meaning here and is only logged.
    pub fn run_async<F>(&self, event: Option<Event>, future: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let dispatcher = self.clone();
        let permits = self.inner.async_permits.clone();
        self.inner.async_tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            match catch_panic(future).await {
                Ok(()) => {}
                Err(DbotError::StopPropagation) => {
                    warn!("StopPropagation is not supported with async callbacks");
                }
                Err(err) => {
                    dispatcher.dispatch_error(event, err).await;
                }
            }
        })
    }

    /// Delivers `error` to every error handler. Returns `true` when a synchronous error handler
    /// asked to stop propagation.
    pub fn dispatch_error(&self, event: Option<Event>, error: DbotError) -> BoxFuture<'static, bool> {
        let dispatcher = self.clone();
        Box::pin(async move {
            let handlers = dispatcher.inner.error_handlers.read().clone();
            if handlers.is_empty() {
                error!(
                    update_id = ?event.as_ref().and_then(Event::update_id),
                    error = %error,
                    "No error handlers are registered, logging exception"
                );
                return false;
            }

            let error = Arc::new(error);
            for (callback, run_async) in handlers {
                let context = CallbackContext::from_error(event.as_ref(), error.clone(), &dispatcher);
                let callback_event = event.clone();
                // Calling the callback happens inside the future so a panic there is caught too.
                let future = async move { callback.call(callback_event, context).await };
                if run_async {
                    dispatcher.inner.async_tasks.spawn(async move {
                        if let Err(err) = catch_panic(future).await {
                            error!(error = %err, "An uncaught error was raised while handling the error");
                        }
                    });
                    continue;
                }
                match catch_panic(future).await {
                    Ok(()) => {}
                    Err(DbotError::StopPropagation) => return true,
                    Err(err) => {
                        error!(error = %err, "An uncaught error was raised while handling the error");
                    }
                }
            }
            false
        })
    }
}

fn same_handler(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

async fn catch_panic<F>(future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(panicked(panic)))
}

fn panicked(payload: Box<dyn Any + Send>) -> DbotError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    HandlerError::Panicked(message).into()
}
