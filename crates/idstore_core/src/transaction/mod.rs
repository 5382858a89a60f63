//! Nested units of work with retry on conflict.
//!
//! - **Frames**: every call to the runner pushes a frame on a per-thread stack
//! - **Propagation**: nested work joins its caller's session or gets its own
//! - **Retry**: owning frames repeat the work on conflict-class errors
//! - **Completion**: callbacks fire once the physical transaction ends

mod cancel;
mod context;
mod handle;
mod runner;

pub use cancel::CancellationToken;
pub use context::{TransactionContext, TransactionFrame};
pub use handle::Transaction;
pub use runner::TransactionRunner;

use std::time::Duration;

/// How a unit of work relates to an enclosing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Join the caller's transaction if there is one.
    #[default]
    Required,
    /// Always run in a new session, committed on its own.
    RequireSeparate,
}

/// How a physical transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Writes were committed.
    Committed,
    /// Writes were discarded.
    RolledBack,
}

/// Options for [`TransactionRunner::run_with`].
///
/// Retry settings left unset fall back to the runner's configuration.
#[derive(Debug, Clone)]
pub struct TxOptions {
    /// Propagation mode.
    pub propagation: Propagation,
    /// Commit automatically when the work succeeds.
    pub auto_commit: bool,
    /// Attempts before giving up on conflicts.
    pub max_retries: Option<u32>,
    /// Back-off unit between attempts.
    pub retry_base_delay: Option<Duration>,
    /// Cancellation signal checked before attempts and during back-off.
    pub cancel: Option<CancellationToken>,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            auto_commit: true,
            max_retries: None,
            retry_base_delay: None,
            cancel: None,
        }
    }
}

impl TxOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the propagation mode.
    #[must_use]
    pub fn propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Sets whether a successful unit of work is committed automatically.
    #[must_use]
    pub fn auto_commit(mut self, value: bool) -> Self {
        self.auto_commit = value;
        self
    }

    /// Overrides the retry budget.
    #[must_use]
    pub fn max_retries(mut self, value: u32) -> Self {
        self.max_retries = Some(value);
        self
    }

    /// Overrides the back-off unit.
    #[must_use]
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
