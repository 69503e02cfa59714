//! Scoped executor usage

use crate::Executor;
use ferrum_types::Result;
use std::ops::Deref;
use std::thread;
use tracing::{error, warn};

/// Guard returned by [`Executor::enter`].
///
/// Derefs to the executor. When the guard goes out of scope, whether by
/// normal exit, early return or a panic unwinding through it, the executor
/// is shut down.
#[must_use = "the executor shuts down as soon as the scope is dropped"]
pub struct ExecutorScope<'a> {
    executor: &'a Executor,
    exited: bool,
}

impl<'a> ExecutorScope<'a> {
    pub(crate) fn new(executor: &'a Executor) -> Self {
        Self {
            executor,
            exited: false,
        }
    }

    /// End the scope explicitly and report the shutdown result
    pub fn exit(mut self) -> Result<()> {
        self.exited = true;
        self.executor.exit(None)
    }

    /// End the scope with the error that interrupted it
    pub fn exit_with_error(mut self, error: &dyn std::error::Error) -> Result<()> {
        self.exited = true;
        self.executor.exit(Some(error))
    }
}

impl Deref for ExecutorScope<'_> {
    type Target = Executor;

    fn deref(&self) -> &Executor {
        self.executor
    }
}

impl Drop for ExecutorScope<'_> {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        if thread::panicking() {
            error!("Executor scope unwinding from a panic, shutting down");
        }
        if let Err(e) = self.executor.exit(None) {
            warn!("Executor shutdown at scope exit failed: {}", e);
        }
    }
}
