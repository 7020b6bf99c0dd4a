use crate::delay_queue::{DelayQueue, DelayQueueConfig};
use dbot_core::Result;
use std::future::Future;
use std::time::Duration;

/// Limits for both queues. Defaults follow Telegram's documented limits: 30 messages per
/// second overall, 20 messages per minute into one group.
#[derive(Debug, Clone)]
pub struct MessageQueueConfig {
    pub all_burst_limit: usize,
    pub all_time_limit: Duration,
    pub group_burst_limit: usize,
    pub group_time_limit: Duration,
    pub autostart: bool,
}

impl Default for MessageQueueConfig {
    fn default() -> Self {
        Self {
            all_burst_limit: 30,
            all_time_limit: Duration::from_millis(1000),
            group_burst_limit: 20,
            group_time_limit: Duration::from_millis(60_000),
            autostart: true,
        }
    }
}

impl MessageQueueConfig {
    #[must_use]
    pub fn all_limit(mut self, burst_limit: usize, time_limit: Duration) -> Self {
        self.all_burst_limit = burst_limit;
        self.all_time_limit = time_limit;
        self
    }

    #[must_use]
    pub fn group_limit(mut self, burst_limit: usize, time_limit: Duration) -> Self {
        self.group_burst_limit = burst_limit;
        self.group_time_limit = time_limit;
        self
    }

    #[must_use]
    pub fn autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }
}

/// Two chained delay queues: group traffic passes the group limiter first and is then
/// forwarded to the global limiter that every message goes through.
pub struct MessageQueue {
    all: DelayQueue,
    group: DelayQueue,
}

impl MessageQueue {
    pub fn new(config: MessageQueueConfig) -> Self {
        let all = DelayQueue::new(
            DelayQueueConfig::default()
                .burst_limit(config.all_burst_limit)
                .time_limit(config.all_time_limit)
                .name("all")
                .autostart(config.autostart),
        );
        let group = DelayQueue::new(
            DelayQueueConfig::default()
                .burst_limit(config.group_burst_limit)
                .time_limit(config.group_time_limit)
                .name("group")
                .autostart(config.autostart),
        );
        Self { all, group }
    }

    pub fn start(&self) {
        self.all.start();
        self.group.start();
    }

    pub async fn stop(&self, timeout: Option<Duration>) {
        self.group.stop(timeout).await;
        self.all.stop(timeout).await;
    }

    pub fn enqueue<F>(&self, task: F, is_group: bool) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if !is_group {
            return self.all.enqueue(task);
        }
        let all = self.all.handle();
        self.group.enqueue(async move { all.enqueue(task) })
    }

    pub fn is_alive(&self) -> bool {
        self.all.is_alive() && self.group.is_alive()
    }
}
