//! Last-error latch and error callback.

use log::warn;

use crate::error::{RofsError, RofsResult};

/// Callback invoked synchronously when an operation fails.
///
/// Receives a formatted message and the error. Any caller context is
/// captured by the closure.
pub type ErrorCallback = Box<dyn FnMut(&str, &RofsError) + Send>;

/// Error facade shared by every layer of the work area.
#[derive(Default)]
pub struct Diagnostics {
    last: Option<RofsError>,
    callback: Option<ErrorCallback>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or clear the callback.
    pub fn set_callback(&mut self, callback: Option<ErrorCallback>) {
        self.callback = callback;
    }

    /// Error latched by the most recent fallible call, if it failed.
    pub fn last_error(&self) -> Option<&RofsError> {
        self.last.as_ref()
    }

    /// Latch the outcome of a public call.
    pub fn track<T>(&mut self, op: &str, result: RofsResult<T>) -> RofsResult<T> {
        match &result {
            Ok(_) => self.last = None,
            Err(err) => self.report(op, err),
        }
        result
    }

    /// Latch `err` and notify the callback.
    pub fn report(&mut self, op: &str, err: &RofsError) {
        let message = format!("{}: {}", op, err);
        warn!("{} (code {})", message, err.code());
        self.last = Some(err.clone());
        if let Some(callback) = self.callback.as_mut() {
            callback(&message, err);
        }
    }
}
