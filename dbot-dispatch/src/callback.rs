//! User callbacks as cloneable boxed async closures.

use crate::context::CallbackContext;
use crate::event::Event;
use dbot_core::Result;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type CallbackFn = dyn Fn(Event, CallbackContext) -> BoxFuture<'static, Result<()>> + Send + Sync;
type ErrorCallbackFn =
    dyn Fn(Option<Event>, CallbackContext) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// Callback invoked by a handler for a matching event.
///
/// Returning [`dbot_core::DbotError::StopPropagation`] stops the event from reaching later groups.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Event, CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |event, context| -> BoxFuture<'static, Result<()>> {
            Box::pin(f(event, context))
        }))
    }

    pub fn call(&self, event: Event, context: CallbackContext) -> BoxFuture<'static, Result<()>> {
        (self.0)(event, context)
    }

    pub fn ptr_eq(&self, other: &Callback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

/// Error handler. Receives the event that failed (none for job errors); the error itself is
/// available through [`CallbackContext::error`].
#[derive(Clone)]
pub struct ErrorCallback(Arc<ErrorCallbackFn>);

impl ErrorCallback {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Option<Event>, CallbackContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |event, context| -> BoxFuture<'static, Result<()>> {
            Box::pin(f(event, context))
        }))
    }

    pub fn call(&self, event: Option<Event>, context: CallbackContext) -> BoxFuture<'static, Result<()>> {
        (self.0)(event, context)
    }

    pub fn ptr_eq(&self, other: &ErrorCallback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ErrorCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorCallback(..)")
    }
}
