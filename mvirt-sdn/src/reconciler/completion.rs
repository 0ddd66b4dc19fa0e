//! Background continuation of configurator operations.
//!
//! A configurator that needs time (starting or stopping a daemon) calls
//! [`OpContext::continue_in_background`], spawns its remaining work and returns
//! immediately. The scheduler keeps the item in transition and dispatches other
//! ready operations until the [`Completion`] reports back.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::ConfiguratorError;

pub(crate) type OpId = u64;

/// Result of a deferred operation, sent back to the scheduler.
#[derive(Debug)]
pub(crate) struct Finished {
    pub op: OpId,
    pub result: Result<(), ConfiguratorError>,
}

/// Per-operation context handed to configurators.
pub struct OpContext {
    op: OpId,
    item: String,
    completions: mpsc::UnboundedSender<Finished>,
    deferred: AtomicBool,
}

impl OpContext {
    pub(crate) fn new(
        op: OpId,
        item: String,
        completions: mpsc::UnboundedSender<Finished>,
    ) -> Self {
        Self {
            op,
            item,
            completions,
            deferred: AtomicBool::new(false),
        }
    }

    /// Defer completion of the current operation.
    ///
    /// The operation is finished only once the returned [`Completion`] is
    /// consumed. Calling this twice for one operation is a programming error.
    pub fn continue_in_background(&self) -> Completion {
        if self.deferred.swap(true, Ordering::SeqCst) {
            panic!(
                "continue_in_background called twice for operation on {}",
                self.item
            );
        }
        debug!(item = %self.item, op = self.op, "Operation continues in background");
        Completion {
            op: self.op,
            item: self.item.clone(),
            completions: Some(self.completions.clone()),
        }
    }

    /// Item the operation is applied to, for log messages.
    pub fn item(&self) -> &str {
        &self.item
    }

    pub(crate) fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::SeqCst)
    }
}

/// Single-use handle reporting the outcome of a deferred operation.
///
/// `done` consumes the handle, so an operation completes at most once. A
/// handle dropped without `done` fails the operation.
#[must_use = "a deferred operation only finishes when done() is called"]
pub struct Completion {
    op: OpId,
    item: String,
    completions: Option<mpsc::UnboundedSender<Finished>>,
}

impl Completion {
    /// Report the outcome. May be called from any task or thread.
    pub fn done(mut self, result: Result<(), ConfiguratorError>) {
        self.send(result);
    }

    fn send(&mut self, result: Result<(), ConfiguratorError>) {
        let Some(completions) = self.completions.take() else {
            return;
        };
        if completions.send(Finished { op: self.op, result }).is_err() {
            // Pass ended (cancelled) before we finished; bookkeeping moved on.
            debug!(
                item = %self.item,
                op = self.op,
                "Completion arrived after pass ended, discarded"
            );
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.completions.is_some() {
            warn!(item = %self.item, op = self.op, "Completion dropped without result");
            self.send(Err(ConfiguratorError::CompletionDropped));
        }
    }
}
