use super::{CheckOutcome, Handler, HandlerOptions};
use crate::callback::Callback;
use crate::event::Event;
use std::any::Any;
use std::marker::PhantomData;

/// Matches events whose payload is exactly a `T`.
///
/// `TypeHandler<Update>` sees every Bot API update, `TypeHandler<String>` every string event, and
/// any other `T` the values pushed with [`Event::custom`].
pub struct TypeHandler<T> {
    callback: Callback,
    options: HandlerOptions,
    _type: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> TypeHandler<T> {
    pub fn new(callback: Callback) -> Self {
        Self {
            callback,
            options: HandlerOptions::default(),
            _type: PhantomData,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: HandlerOptions) -> Self {
        self.options = options;
        self
    }
}

impl<T: Any + Send + Sync> Handler for TypeHandler<T> {
    fn check_update(&self, event: &Event) -> Option<CheckOutcome> {
        event.as_any().is::<T>().then(CheckOutcome::matched)
    }

    fn callback(&self) -> &Callback {
        &self.callback
    }

    fn options(&self) -> HandlerOptions {
        self.options
    }
}
