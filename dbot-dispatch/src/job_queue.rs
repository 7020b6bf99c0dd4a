//! # Job queue
//!
//! Scheduled callbacks: one-shot, repeating, daily, monthly and cron. A single background loop sleeps
//! until the earliest job is due (or a new job is scheduled), then hands the callback to the
//! dispatcher's async pool so jobs and handlers share one concurrency model.
//!
//! Next runs are computed from the previous *scheduled* run, not from when it actually ran, so
//! repeating jobs never drift.

use crate::context::CallbackContext;
use crate::dispatcher::{Dispatcher, WeakDispatcher};
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use dbot_core::{DbotError, HandlerError, Result};
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// All seven days, for [`JobQueue::run_daily`].
pub const EVERY_DAY: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Source of wall-clock time for daily and cron schedules.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// When a one-shot job (or the first run of a repeating one) fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
    After(Duration),
    At(DateTime<Utc>),
}

impl From<Duration> for When {
    fn from(delay: Duration) -> Self {
        When::After(delay)
    }
}

impl From<DateTime<Utc>> for When {
    fn from(at: DateTime<Utc>) -> Self {
        When::At(at)
    }
}

type JobCallback = dyn Fn(CallbackContext) -> BoxFuture<'static, Result<()>> + Send + Sync;

enum Trigger {
    Once,
    Repeating(Duration),
    Daily { time: NaiveTime, days: Vec<Weekday> },
    Monthly { time: NaiveTime, day: u32, strict: bool },
    Cron(Box<cron::Schedule>),
}

impl Trigger {
    /// Slot following `at`, or `None` when the job is finished.
    fn next_after(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Once => None,
            Trigger::Repeating(interval) => Some(add_std(at, *interval)),
            Trigger::Daily { time, days } => next_daily(at, *time, days),
            Trigger::Monthly { time, day, strict } => next_monthly(at, *time, *day, *strict),
            Trigger::Cron(schedule) => schedule.after(&at).next(),
        }
    }
}

struct JobInner {
    name: String,
    callback: Box<JobCallback>,
    trigger: Trigger,
    context: RwLock<Option<Arc<dyn Any + Send + Sync>>>,
    enabled: AtomicBool,
    removed: AtomicBool,
    next_t: Mutex<Option<DateTime<Utc>>>,
}

/// Handle to a scheduled job. Clones refer to the same job.
#[derive(Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Job {
    fn new(name: String, callback: Box<JobCallback>, trigger: Trigger) -> Self {
        Self {
            inner: Arc::new(JobInner {
                name,
                callback,
                trigger,
                context: RwLock::new(None),
                enabled: AtomicBool::new(true),
                removed: AtomicBool::new(false),
                next_t: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Marks the job removed. It will not run again, even if it is already due.
    pub fn schedule_removal(&self) {
        self.inner.removed.store(true, Ordering::SeqCst);
        *self.inner.next_t.lock() = None;
    }

    pub fn removed(&self) -> bool {
        self.inner.removed.load(Ordering::SeqCst)
    }

    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// A disabled job keeps its schedule but its runs are skipped.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Next scheduled run; `None` once the job is finished or removed.
    pub fn next_t(&self) -> Option<DateTime<Utc>> {
        *self.inner.next_t.lock()
    }

    /// Attaches an arbitrary payload the callback can read back through [`Job::context`].
    pub fn with_context<T: Any + Send + Sync>(self, value: T) -> Self {
        *self.inner.context.write() = Some(Arc::new(value));
        self
    }

    pub fn context(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.context.read().clone()
    }

    pub fn context_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.context().and_then(|c| c.downcast::<T>().ok())
    }

    pub fn ptr_eq(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name())
            .field("enabled", &self.enabled())
            .field("removed", &self.removed())
            .field("next_t", &self.next_t())
            .finish()
    }
}

struct Entry {
    due: Instant,
    seq: u64,
    at: DateTime<Utc>,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

struct QueueInner {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    seq: AtomicU64,
    wake: Notify,
    dispatcher: RwLock<Option<WeakDispatcher>>,
    clock: Arc<dyn Clock>,
    runner: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Cloneable handle to the scheduler.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                heap: Mutex::new(BinaryHeap::new()),
                seq: AtomicU64::new(0),
                wake: Notify::new(),
                dispatcher: RwLock::new(None),
                clock,
                runner: Mutex::new(None),
            }),
        }
    }

    /// Points the queue at the dispatcher whose async pool runs the callbacks.
    pub fn set_dispatcher(&self, dispatcher: &Dispatcher) {
        *self.inner.dispatcher.write() = Some(dispatcher.downgrade());
    }

    /// Runs `callback` once.
    pub fn run_once<F, Fut>(&self, callback: F, when: impl Into<When>, name: Option<&str>) -> Job
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let job = Job::new(job_name::<F>(name), boxed(callback), Trigger::Once);
        let (due, at) = self.resolve(when.into());
        self.inner.push(job.clone(), due, at);
        job
    }

    /// Runs `callback` every `interval`, first after `first` (default: one interval).
    pub fn run_repeating<F, Fut>(
        &self,
        callback: F,
        interval: Duration,
        first: Option<When>,
        name: Option<&str>,
    ) -> Result<Job>
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(HandlerError::State("repeat interval must be positive".to_string()).into());
        }
        let job = Job::new(job_name::<F>(name), boxed(callback), Trigger::Repeating(interval));
        let (due, at) = self.resolve(first.unwrap_or(When::After(interval)));
        self.inner.push(job.clone(), due, at);
        Ok(job)
    }

    /// Runs `callback` every day at `time` (UTC) on the given weekdays.
    pub fn run_daily<F, Fut>(
        &self,
        callback: F,
        time: NaiveTime,
        days: &[Weekday],
        name: Option<&str>,
    ) -> Result<Job>
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if days.is_empty() {
            return Err(HandlerError::State("run_daily needs at least one day".to_string()).into());
        }
        let trigger = Trigger::Daily {
            time,
            days: days.to_vec(),
        };
        self.schedule_from_trigger(job_name::<F>(name), boxed(callback), trigger)
    }

    /// Runs `callback` every month on `day` at `time` (UTC).
    ///
    /// With `day_is_strict` months without that day are skipped; otherwise the job runs on their
    /// last day instead.
    pub fn run_monthly<F, Fut>(
        &self,
        callback: F,
        time: NaiveTime,
        day: u32,
        day_is_strict: bool,
        name: Option<&str>,
    ) -> Result<Job>
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if !(1..=31).contains(&day) {
            return Err(HandlerError::State(format!("day of month must be 1-31, got {day}")).into());
        }
        let trigger = Trigger::Monthly {
            time,
            day,
            strict: day_is_strict,
        };
        self.schedule_from_trigger(job_name::<F>(name), boxed(callback), trigger)
    }

    /// Runs `callback` on a cron schedule (seconds-resolution expression, e.g. `0 30 9 * * Mon-Fri`).
    pub fn run_custom<F, Fut>(&self, callback: F, expression: &str, name: Option<&str>) -> Result<Job>
    where
        F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|e| HandlerError::InvalidPattern(format!("{expression}: {e}")))?;
        let trigger = Trigger::Cron(Box::new(schedule));
        self.schedule_from_trigger(job_name::<F>(name), boxed(callback), trigger)
    }

    fn schedule_from_trigger(&self, name: String, callback: Box<JobCallback>, trigger: Trigger) -> Result<Job> {
        let now = self.inner.clock.now();
        let Some(first) = trigger.next_after(now) else {
            return Err(HandlerError::State(format!("schedule of job {name} never fires")).into());
        };
        let job = Job::new(name, callback, trigger);
        let (due, at) = self.resolve(When::At(first));
        self.inner.push(job.clone(), due, at);
        Ok(job)
    }

    fn resolve(&self, when: When) -> (Instant, DateTime<Utc>) {
        let now = self.inner.clock.now();
        match when {
            When::After(delay) => (Instant::now() + delay, add_std(now, delay)),
            When::At(at) => {
                let delay = (at - now).to_std().unwrap_or(Duration::ZERO);
                (Instant::now() + delay, at)
            }
        }
    }

    /// Scheduled, not-removed jobs ordered by next run.
    pub fn jobs(&self) -> Vec<Job> {
        let mut entries: Vec<(Instant, u64, Job)> = self
            .inner
            .heap
            .lock()
            .iter()
            .map(|Reverse(e)| (e.due, e.seq, e.job.clone()))
            .collect();
        entries.sort_by_key(|(due, seq, _)| (*due, *seq));
        entries
            .into_iter()
            .map(|(_, _, job)| job)
            .filter(|job| !job.removed())
            .collect()
    }

    pub fn get_jobs_by_name(&self, name: &str) -> Vec<Job> {
        self.jobs().into_iter().filter(|job| job.name() == name).collect()
    }

    /// Starts the scheduling loop. Fails when no dispatcher has been set.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        if self.inner.dispatcher.read().is_none() {
            return Err(DbotError::Config(
                "job queue has no dispatcher; call set_dispatcher first".to_string(),
            ));
        }
        let mut runner = self.inner.runner.lock();
        if runner.is_some() {
            debug!("Job queue already running");
            return Ok(());
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.inner.clone(), cancel.clone()));
        *runner = Some((cancel, handle));
        info!("step: job queue started");
        Ok(())
    }

    /// Stops the loop. Callbacks already handed to the dispatcher are not interrupted.
    pub async fn stop(&self) {
        let runner = self.inner.runner.lock().take();
        if let Some((cancel, handle)) = runner {
            cancel.cancel();
            let _ = handle.await;
            info!("step: job queue stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.runner.lock().is_some()
    }
}

impl QueueInner {
    fn push(&self, job: Job, due: Instant, at: DateTime<Utc>) {
        *job.inner.next_t.lock() = Some(at);
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(Reverse(Entry { due, seq, at, job }));
        self.wake.notify_one();
    }

    fn next_due(&self) -> Option<Instant> {
        self.heap.lock().peek().map(|Reverse(e)| e.due)
    }

    /// Pops the earliest entry, reschedules it and hands the callback to the dispatcher.
    fn run_next(&self) {
        let Some(Reverse(entry)) = self.heap.lock().pop() else {
            return;
        };
        let job = entry.job;
        if job.removed() {
            debug!(job = job.name(), "Dropping removed job");
            return;
        }

        let last_run = match job.inner.trigger.next_after(entry.at) {
            Some(next_at) => {
                let step = (next_at - entry.at).to_std().unwrap_or(Duration::ZERO);
                self.push(job.clone(), entry.due + step, next_at);
                false
            }
            None => {
                *job.inner.next_t.lock() = None;
                true
            }
        };

        if !job.enabled() {
            debug!(job = job.name(), "Skipping disabled job");
            if last_run {
                job.inner.removed.store(true, Ordering::SeqCst);
            }
            return;
        }
        let Some(dispatcher) = self.dispatcher.read().as_ref().and_then(WeakDispatcher::upgrade) else {
            warn!(job = job.name(), "Dispatcher is gone, job not run");
            return;
        };
        debug!(job = job.name(), "step: running job");
        let context = CallbackContext::from_job(job.clone(), &dispatcher);
        dispatcher.run_async(None, async move {
            // Removal may land between the pop and the moment the pool gets to this job; the
            // callback is not even called then.
            if job.removed() {
                debug!(job = job.name(), "Job removed before it ran");
                return Ok(());
            }
            if last_run {
                job.inner.removed.store(true, Ordering::SeqCst);
            }
            (job.inner.callback)(context).await
        });
    }
}

async fn run_loop(queue: Arc<QueueInner>, cancel: CancellationToken) {
    loop {
        let next_due = queue.next_due();
        if next_due.is_some_and(|due| due <= Instant::now()) {
            queue.run_next();
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = queue.wake.notified() => {}
            _ = sleep_until(next_due) => {}
        }
    }
}

async fn sleep_until(due: Option<Instant>) {
    match due {
        Some(due) => tokio::time::sleep_until(due).await,
        None => std::future::pending().await,
    }
}

fn boxed<F, Fut>(callback: F) -> Box<JobCallback>
where
    F: Fn(CallbackContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |context| -> BoxFuture<'static, Result<()>> { Box::pin(callback(context)) })
}

fn job_name<F>(name: Option<&str>) -> String {
    name.map(str::to_string)
        .unwrap_or_else(|| std::any::type_name::<F>().to_string())
}

fn add_std(at: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(at)
}

/// First `time` slot strictly after `after` that falls on one of `days` (UTC).
fn next_daily(after: DateTime<Utc>, time: NaiveTime, days: &[Weekday]) -> Option<DateTime<Utc>> {
    let mut date = after.date_naive();
    for _ in 0..8 {
        let slot = Utc.from_utc_datetime(&date.and_time(time));
        if slot > after && days.contains(&slot.weekday()) {
            return Some(slot);
        }
        date = date.succ_opt()?;
    }
    None
}

/// First `day`-of-month `time` slot strictly after `after` (UTC). Non-strict schedules fall
/// back to the month's last day when it is shorter than `day`.
fn next_monthly(after: DateTime<Utc>, time: NaiveTime, day: u32, strict: bool) -> Option<DateTime<Utc>> {
    let (mut year, mut month) = (after.year(), after.month());
    // Every day 1-31 occurs within any run of 13 months.
    for _ in 0..13 {
        let date = NaiveDate::from_ymd_opt(year, month, day).or_else(|| {
            if strict {
                None
            } else {
                (28..day).rev().find_map(|d| NaiveDate::from_ymd_opt(year, month, d))
            }
        });
        if let Some(date) = date {
            let slot = Utc.from_utc_datetime(&date.and_time(time));
            if slot > after {
                return Some(slot);
            }
        }
        (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_next_daily_skips_to_allowed_weekday() {
        // 2024-01-01 is a Monday.
        let now = at("2024-01-01T10:00:00Z");
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let eleven = NaiveTime::from_hms_opt(11, 0, 0).unwrap();

        assert_eq!(next_daily(now, eleven, &EVERY_DAY), Some(at("2024-01-01T11:00:00Z")));
        assert_eq!(next_daily(now, nine, &EVERY_DAY), Some(at("2024-01-02T09:00:00Z")));
        assert_eq!(next_daily(now, nine, &[Weekday::Wed]), Some(at("2024-01-03T09:00:00Z")));
        assert_eq!(
            next_daily(at("2024-01-03T09:00:00Z"), nine, &[Weekday::Wed]),
            Some(at("2024-01-10T09:00:00Z"))
        );
    }

    #[test]
    fn test_next_monthly_strict_and_clamped() {
        let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();

        assert_eq!(
            next_monthly(at("2024-01-15T12:00:00Z"), ten, 15, true),
            Some(at("2024-02-15T10:00:00Z"))
        );
        assert_eq!(
            next_monthly(at("2024-01-15T09:00:00Z"), ten, 15, true),
            Some(at("2024-01-15T10:00:00Z"))
        );
        // February 2024 has no 31st: strict skips to March, lenient runs on the 29th.
        assert_eq!(
            next_monthly(at("2024-01-31T11:00:00Z"), ten, 31, true),
            Some(at("2024-03-31T10:00:00Z"))
        );
        assert_eq!(
            next_monthly(at("2024-01-31T11:00:00Z"), ten, 31, false),
            Some(at("2024-02-29T10:00:00Z"))
        );
        assert_eq!(
            next_monthly(at("2024-12-20T00:00:00Z"), ten, 5, true),
            Some(at("2025-01-05T10:00:00Z"))
        );
    }

    #[test]
    fn test_entry_order_breaks_ties_by_sequence() {
        let job = Job::new("j".into(), boxed(|_| async { Ok(()) }), Trigger::Once);
        let due = Instant::now();
        let now = Utc::now();
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(Entry { due, seq: 2, at: now, job: job.clone() }));
        heap.push(Reverse(Entry { due, seq: 1, at: now, job: job.clone() }));
        heap.push(Reverse(Entry { due: due + Duration::from_secs(1), seq: 0, at: now, job }));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|Reverse(e)| e.seq)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_job_context_and_flags() {
        let job = Job::new("j".into(), boxed(|_| async { Ok(()) }), Trigger::Once).with_context(7u8);

        assert_eq!(job.context_as::<u8>().as_deref(), Some(&7));
        assert!(job.context_as::<u16>().is_none());
        assert!(job.enabled());
        job.set_enabled(false);
        assert!(!job.enabled());
        job.schedule_removal();
        assert!(job.removed());
        assert_eq!(job.next_t(), None);
    }
}
