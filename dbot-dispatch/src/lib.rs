//! # dbot-dispatch
//!
//! Routes events to user callbacks: [`Dispatcher`] (handler groups, worker pool, error handlers),
//! the [`Handler`] variants and [`Filter`] trees that select events, the [`CallbackContext`]
//! handed to callbacks, and the [`JobQueue`] scheduler.

pub mod callback;
pub mod context;
pub mod dispatcher;
pub mod event;
pub mod filters;
pub mod handler;
pub mod job_queue;

pub use callback::{Callback, ErrorCallback};
pub use context::{CallbackContext, DataStore};
pub use dispatcher::{Dispatcher, DispatcherBuilder, UpdateQueue, DEFAULT_WORKERS};
pub use event::Event;
pub use filters::{Filter, UpdateKindFilter};
pub use handler::{
    CallbackQueryHandler, CheckOutcome, ChosenInlineResultHandler, CommandHandler, ContextNeeds,
    Handler, HandlerOptions, InlineQueryHandler, MessageHandler, PollAnswerHandler, PollHandler,
    PreCheckoutQueryHandler, PrefixHandler, RegexMatch, ShippingQueryHandler, StringCommandHandler,
    StringRegexHandler, TypeHandler,
};
pub use job_queue::{Clock, Job, JobQueue, SystemClock, When, EVERY_DAY};
