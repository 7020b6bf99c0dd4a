//! # dbot-mq
//!
//! Keeps outbound Bot API calls under Telegram's flood limits. [`DelayQueue`] releases queued
//! work at most `burst_limit` times per sliding `time_limit` window; [`MessageQueue`] chains a
//! per-group limiter in front of the global one; [`ThrottledBot`] routes message calls through it.

pub mod delay_queue;
pub mod message_queue;
pub mod throttled;

pub use delay_queue::{DelayQueue, DelayQueueConfig, DelayQueueHandle};
pub use message_queue::{MessageQueue, MessageQueueConfig};
pub use throttled::ThrottledBot;
