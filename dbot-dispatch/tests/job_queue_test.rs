//! Integration tests for [`dbot_dispatch::JobQueue`] on tokio's paused clock.
//!
//! Covers: one-shot runs, repeating runs without drift, removal (including a job already due),
//! disabled jobs, job errors reaching the dispatcher's error handlers, daily, monthly and cron
//! schedules.

mod common;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use common::NullBot;
use dbot_core::{DbotError, HandlerError};
use dbot_dispatch::{CallbackContext, Clock, Dispatcher, ErrorCallback, Job, JobQueue, When};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

fn fixed(s: &str) -> Arc<FixedClock> {
    Arc::new(FixedClock(DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)))
}

fn started(job_queue: JobQueue, workers: usize) -> Dispatcher {
    let dispatcher = Dispatcher::builder(Arc::new(NullBot))
        .workers(workers)
        .job_queue(job_queue.clone())
        .build();
    job_queue.start().unwrap();
    dispatcher
}

type Ready = std::future::Ready<dbot_core::Result<()>>;

/// Job callback that only counts its runs.
fn counter() -> (Arc<AtomicUsize>, impl Fn(CallbackContext) -> Ready + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    (count, move |_| {
        c.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(()))
    })
}

/// **Test: run_once fires exactly once after the delay.**
#[tokio::test(start_paused = true)]
async fn test_run_once() {
    let jq = JobQueue::new();
    let _d = started(jq.clone(), 2);
    let (count, callback) = counter();

    let job = jq.run_once(callback, Duration::from_millis(100), Some("once"));
    assert!(job.next_t().is_some());

    sleep(Duration::from_millis(99)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    sleep(Duration::from_millis(400)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(job.removed());
    assert!(job.next_t().is_none());
    assert!(jq.jobs().is_empty());
}

/// **Test: the Nth run of a repeating job happens at t0 + N*T even when runs take time.**
///
/// **Setup:** interval 100 ms; the callback sleeps 30 ms.
/// **Expected:** run offsets are exactly 100, 200, ..., 500 ms.
#[tokio::test(start_paused = true)]
async fn test_repeating_does_not_drift() {
    let jq = JobQueue::new();
    let _d = started(jq.clone(), 2);
    let t0 = Instant::now();
    let runs = Arc::new(Mutex::new(Vec::new()));

    let recorded = runs.clone();
    jq.run_repeating(
        move |_| {
            let recorded = recorded.clone();
            async move {
                recorded.lock().push(t0.elapsed().as_millis());
                sleep(Duration::from_millis(30)).await;
                Ok(())
            }
        },
        Duration::from_millis(100),
        None,
        Some("tick"),
    )
    .unwrap();

    sleep(Duration::from_millis(550)).await;

    assert_eq!(*runs.lock(), vec![100, 200, 300, 400, 500]);
}

/// **Test: a removed job is never invoked again.**
#[tokio::test(start_paused = true)]
async fn test_schedule_removal() {
    let jq = JobQueue::new();
    let _d = started(jq.clone(), 2);
    let (count, callback) = counter();

    let job = jq
        .run_repeating(callback, Duration::from_millis(100), Some(When::After(Duration::ZERO)), None)
        .unwrap();
    sleep(Duration::from_millis(150)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);

    job.schedule_removal();
    job.schedule_removal();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(job.removed());
    assert!(jq.jobs().is_empty());
}

/// **Test: removal wins even when the job is already due in the same pass.**
///
/// **Setup:** one worker; jobs A and B due at the same instant, A removes B.
/// **Expected:** A ran, B never did.
#[tokio::test(start_paused = true)]
async fn test_removal_of_job_already_due() {
    let jq = JobQueue::new();
    let _d = started(jq.clone(), 1);
    let victim: Arc<Mutex<Option<Job>>> = Arc::default();
    let (count_b, callback_b) = counter();

    let target = victim.clone();
    jq.run_once(
        move |_| {
            let target = target.clone();
            async move {
                if let Some(job) = target.lock().as_ref() {
                    job.schedule_removal();
                }
                Ok(())
            }
        },
        Duration::from_millis(50),
        Some("a"),
    );
    *victim.lock() = Some(jq.run_once(callback_b, Duration::from_millis(50), Some("b")));

    sleep(Duration::from_millis(200)).await;

    assert_eq!(count_b.load(Ordering::SeqCst), 0);
}

/// **Test: a disabled job keeps its schedule but does not run until re-enabled.**
#[tokio::test(start_paused = true)]
async fn test_disabled_job_is_skipped() {
    let jq = JobQueue::new();
    let _d = started(jq.clone(), 2);
    let (count, callback) = counter();

    let job = jq.run_repeating(callback, Duration::from_millis(100), None, None).unwrap();
    job.set_enabled(false);
    sleep(Duration::from_millis(350)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(jq.jobs().len(), 1);

    job.set_enabled(true);
    sleep(Duration::from_millis(100)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

/// **Test: job errors reach the error handlers with no event, and the job keeps its schedule.**
#[tokio::test(start_paused = true)]
async fn test_job_error_routed_and_job_continues() {
    let jq = JobQueue::new();
    let d = started(jq.clone(), 2);
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();
    d.add_error_handler(
        ErrorCallback::new(move |event, ctx| {
            let seen = seen.clone();
            async move {
                seen.lock().push((event.is_none(), ctx.error().map(|e| e.to_string())));
                Ok(())
            }
        }),
        false,
    );

    jq.run_repeating(
        |_| async { Err(DbotError::from(HandlerError::Failed("job broke".to_string()))) },
        Duration::from_millis(100),
        None,
        Some("flaky"),
    )
    .unwrap();
    sleep(Duration::from_millis(250)).await;

    let errors = errors.lock();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].0);
    assert_eq!(errors[0].1.as_deref(), Some("Handler error: Callback failed: job broke"));
}

/// **Test: the callback context exposes the job and its payload.**
#[tokio::test(start_paused = true)]
async fn test_job_context_payload() {
    let jq = JobQueue::new();
    let _d = started(jq.clone(), 2);
    let seen = Arc::new(Mutex::new(None));

    let out = seen.clone();
    jq.run_once(
        move |ctx| {
            let out = out.clone();
            async move {
                let job = ctx.job().cloned();
                *out.lock() = job.and_then(|j| j.context_as::<i64>()).map(|v| *v);
                Ok(())
            }
        },
        Duration::from_millis(10),
        Some("reminder"),
    )
    .with_context(-42i64);

    sleep(Duration::from_millis(20)).await;
    assert_eq!(*seen.lock(), Some(-42));
}

#[tokio::test]
async fn test_start_without_dispatcher_fails() {
    let jq = JobQueue::new();
    assert!(matches!(jq.start(), Err(DbotError::Config(_))));
    assert!(!jq.is_running());
}

/// **Test: run_daily picks the next allowed weekday slot and fires there.**
///
/// **Setup:** clock pinned to Monday 2024-01-01 10:00 UTC; daily 09:00 on Wednesdays.
/// **Expected:** next_t is Wednesday 09:00; the job has run once after 47 hours.
#[tokio::test(start_paused = true)]
async fn test_run_daily() {
    let jq = JobQueue::with_clock(fixed("2024-01-01T10:00:00Z"));
    let _d = started(jq.clone(), 2);
    let (count, callback) = counter();

    let job = jq
        .run_daily(callback, NaiveTime::from_hms_opt(9, 0, 0).unwrap(), &[Weekday::Wed], Some("weekly"))
        .unwrap();

    assert_eq!(job.next_t().unwrap().to_rfc3339(), "2024-01-03T09:00:00+00:00");

    sleep(Duration::from_secs(47 * 3600 - 1)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(job.next_t().unwrap().to_rfc3339(), "2024-01-10T09:00:00+00:00");

    assert!(jq.run_daily(|_| async { Ok(()) }, NaiveTime::from_hms_opt(0, 0, 0).unwrap(), &[], None).is_err());
}

/// **Test: run_monthly fires on the day and falls back to the last day of short months.**
///
/// **Setup:** clock pinned to 2024-01-30 10:00 UTC; monthly on the 31st at 10:00, not strict.
/// **Expected:** fires after 24 hours; the following run is 2024-02-29.
#[tokio::test(start_paused = true)]
async fn test_run_monthly() {
    let jq = JobQueue::with_clock(fixed("2024-01-30T10:00:00Z"));
    let _d = started(jq.clone(), 2);
    let (count, callback) = counter();
    let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();

    let job = jq.run_monthly(callback, ten, 31, false, Some("monthly")).unwrap();
    assert_eq!(job.next_t().unwrap().to_rfc3339(), "2024-01-31T10:00:00+00:00");

    sleep(Duration::from_secs(24 * 3600 - 1)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(job.next_t().unwrap().to_rfc3339(), "2024-02-29T10:00:00+00:00");

    let strict = jq.run_monthly(|_| async { Ok(()) }, ten, 30, true, None).unwrap();
    assert_eq!(strict.next_t().unwrap().to_rfc3339(), "2024-03-30T10:00:00+00:00");
    assert!(jq.run_monthly(|_| async { Ok(()) }, ten, 0, true, None).is_err());
    assert!(jq.run_monthly(|_| async { Ok(()) }, ten, 32, false, None).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_run_custom_cron() {
    let jq = JobQueue::with_clock(fixed("2024-01-01T10:00:00Z"));
    let _d = started(jq.clone(), 2);

    let job = jq.run_custom(|_| async { Ok(()) }, "0 0 12 * * *", Some("noon")).unwrap();

    assert_eq!(job.next_t().unwrap().to_rfc3339(), "2024-01-01T12:00:00+00:00");
    assert_eq!(jq.get_jobs_by_name("noon").len(), 1);
    assert!(jq.get_jobs_by_name("midnight").is_empty());
    assert!(jq.run_custom(|_| async { Ok(()) }, "not a cron line", None).is_err());
}

#[tokio::test]
async fn test_zero_interval_rejected() {
    let jq = JobQueue::new();
    assert!(jq.run_repeating(|_| async { Ok(()) }, Duration::ZERO, None, None).is_err());
}
