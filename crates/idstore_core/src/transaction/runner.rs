//! The transactional entry point.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::transaction::cancel::CancellationToken;
use crate::transaction::context::{self, TransactionFrame};
use crate::transaction::handle::{PhysicalTransaction, Transaction};
use crate::transaction::{Propagation, TxOptions};
use idstore_storage::SessionProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, warn};

static NEXT_RUNNER_ID: AtomicU64 = AtomicU64::new(1);

/// Runs units of work inside transactions.
///
/// A unit of work is a closure taking `&Transaction`. It may be invoked more
/// than once: when the owning frame hits a conflict the whole closure is
/// repeated against a fresh session, so it must not carry side effects
/// outside the transaction between attempts.
///
/// ## Nesting
///
/// - On an idle thread a new session is acquired and the frame owns it.
/// - [`Propagation::Required`] inside another frame joins that frame's
///   session. Joined frames never commit, never retry and, when they fail,
///   mark the transaction rollback-only.
/// - [`Propagation::RequireSeparate`] always acquires its own session and
///   commits independently of its caller.
///
/// Clones share the same id and therefore the same per-thread stacks.
///
/// # Example
///
/// ```rust
/// use idstore_core::{Config, TransactionRunner};
/// use idstore_storage::InMemoryProvider;
/// use std::sync::Arc;
///
/// let runner = TransactionRunner::new(Arc::new(InMemoryProvider::new()), &Config::default());
/// let depth = runner
///     .run_in_transaction_ret(|outer| {
///         runner.run_in_transaction_ret(|inner| {
///             assert_eq!(inner.session_id(), outer.session_id());
///             Ok(inner.depth())
///         })
///     })
///     .unwrap();
/// assert_eq!(depth, 2);
/// ```
#[derive(Clone)]
pub struct TransactionRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    id: u64,
    provider: Arc<dyn SessionProvider>,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl TransactionRunner {
    /// Creates a runner over `provider` with retry defaults from `config`.
    pub fn new(provider: Arc<dyn SessionProvider>, config: &Config) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                id: NEXT_RUNNER_ID.fetch_add(1, Ordering::Relaxed),
                provider,
                max_retries: config.max_retries,
                retry_base_delay: config.retry_base_delay,
            }),
        }
    }

    /// Returns the session provider.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.inner.provider
    }

    /// Depth of the calling thread's transaction stack.
    #[must_use]
    pub fn depth(&self) -> usize {
        context::depth(self.inner.id)
    }

    /// Returns true if the calling thread is inside a unit of work.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.depth() > 0
    }

    /// Returns true if the calling thread is inside a nested unit of work.
    #[must_use]
    pub fn is_subtransaction(&self) -> bool {
        self.depth() > 1
    }

    /// Returns true if the calling thread holds any transaction state.
    #[must_use]
    pub fn has_thread_state(&self) -> bool {
        context::has_stack(self.inner.id)
    }

    /// Runs `work` with default options.
    pub fn run_in_transaction<F>(&self, work: F) -> CoreResult<()>
    where
        F: FnMut(&Transaction) -> CoreResult<()>,
    {
        self.run_with(TxOptions::default(), work)
    }

    /// Runs `work` with default options and returns its result.
    pub fn run_in_transaction_ret<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnMut(&Transaction) -> CoreResult<T>,
    {
        self.run_with(TxOptions::default(), work)
    }

    /// Runs `work` in its own session, committed independently of any caller.
    pub fn run_in_separate_transaction<T, F>(&self, work: F) -> CoreResult<T>
    where
        F: FnMut(&Transaction) -> CoreResult<T>,
    {
        self.run_with(
            TxOptions::default().propagation(Propagation::RequireSeparate),
            work,
        )
    }

    /// Runs `work` with explicit options.
    ///
    /// # Errors
    ///
    /// Returns the work's own error, `RetriesExhausted` once the retry budget
    /// is spent on conflicts, `RollbackOnly` if a nested frame failed,
    /// `Cancelled` if the token fired, or a storage error from acquiring,
    /// committing or releasing the session.
    pub fn run_with<T, F>(&self, options: TxOptions, mut work: F) -> CoreResult<T>
    where
        F: FnMut(&Transaction) -> CoreResult<T>,
    {
        if let Some(token) = &options.cancel {
            if token.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
        }

        if options.propagation == Propagation::Required {
            if let Some(physical) = context::current_physical(self.inner.id) {
                return self.run_joined(physical, &mut work);
            }
        }

        let attempts = options
            .max_retries
            .unwrap_or(self.inner.max_retries)
            .max(1);
        let base_delay = options
            .retry_base_delay
            .unwrap_or(self.inner.retry_base_delay);

        let mut attempt = 1;
        loop {
            match self.run_owned(&options, &mut work) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    if attempt >= attempts {
                        warn!(attempts, error = %e, "giving up after repeated conflicts");
                        return Err(CoreError::RetriesExhausted {
                            attempts,
                            source: Box::new(e),
                        });
                    }
                    let delay = backoff_delay(base_delay, attempt);
                    warn!(attempt, attempts, ?delay, error = %e, "transaction conflict, retrying");
                    if sleep_unless_cancelled(options.cancel.as_ref(), delay) {
                        return Err(CoreError::Cancelled);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn run_owned<T, F>(&self, options: &TxOptions, work: &mut F) -> CoreResult<T>
    where
        F: FnMut(&Transaction) -> CoreResult<T>,
    {
        let session = self.inner.provider.acquire(true)?;
        let physical = Arc::new(PhysicalTransaction::new(session));
        let depth = context::push_frame(
            self.inner.id,
            TransactionFrame::new(options.propagation, Arc::clone(&physical), true),
        );
        debug!(session = %physical.session_id(), depth, propagation = ?options.propagation, "frame pushed");

        let mut guard = FrameGuard::new(self, Arc::clone(&physical), true);
        let tx = Transaction::new(Arc::clone(&physical), options.propagation, true, depth);

        let outcome = match work(&tx) {
            Ok(value) if options.auto_commit => physical.commit().map(|()| value),
            Ok(value) => Ok(value),
            Err(e) => Err(e),
        };

        match (outcome, guard.finish()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                error!(error = %cleanup, "cleanup failed after unit of work error");
                Err(e)
            }
        }
    }

    fn run_joined<T, F>(&self, physical: Arc<PhysicalTransaction>, work: &mut F) -> CoreResult<T>
    where
        F: FnMut(&Transaction) -> CoreResult<T>,
    {
        let depth = context::push_frame(
            self.inner.id,
            TransactionFrame::new(Propagation::Required, Arc::clone(&physical), false),
        );
        debug!(session = %physical.session_id(), depth, "joined frame pushed");

        let mut guard = FrameGuard::new(self, Arc::clone(&physical), false);
        let tx = Transaction::new(Arc::clone(&physical), Propagation::Required, false, depth);

        let result = work(&tx);
        if let Err(e) = &result {
            debug!(session = %physical.session_id(), error = %e, "nested frame failed, marking rollback-only");
            physical.mark_rollback_only();
        }
        guard.finish()?;
        result
    }

    fn cleanup(&self, physical: &Arc<PhysicalTransaction>, owns_session: bool) -> CoreResult<()> {
        match context::pop_frame(self.inner.id) {
            Some(frame) if Arc::ptr_eq(frame.physical(), physical) => {}
            Some(frame) => {
                error!(expected = %physical.session_id(), found = %frame.session_id(), "popped unexpected frame");
            }
            None => error!(session = %physical.session_id(), "transaction stack already empty"),
        }

        if !owns_session {
            return Ok(());
        }

        let rollback = physical.rollback();
        let release = match physical.take_session() {
            Some(session) => self.inner.provider.release(session).map_err(CoreError::from),
            None => Ok(()),
        };
        debug!(session = %physical.session_id(), "frame released its session");
        rollback.and(release)
    }
}

impl std::fmt::Debug for TransactionRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRunner")
            .field("id", &self.inner.id)
            .field("max_retries", &self.inner.max_retries)
            .field("retry_base_delay", &self.inner.retry_base_delay)
            .finish_non_exhaustive()
    }
}

/// Pops the frame and, for owning frames, rolls back and releases the
/// session. Runs from `Drop` if the unit of work panics.
struct FrameGuard<'a> {
    runner: &'a TransactionRunner,
    physical: Arc<PhysicalTransaction>,
    owns_session: bool,
    armed: bool,
}

impl<'a> FrameGuard<'a> {
    fn new(
        runner: &'a TransactionRunner,
        physical: Arc<PhysicalTransaction>,
        owns_session: bool,
    ) -> Self {
        Self {
            runner,
            physical,
            owns_session,
            armed: true,
        }
    }

    fn finish(&mut self) -> CoreResult<()> {
        self.armed = false;
        self.runner.cleanup(&self.physical, self.owns_session)
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.physical.mark_rollback_only();
        if let Err(e) = self.runner.cleanup(&self.physical, self.owns_session) {
            error!(error = %e, "cleanup failed while unwinding");
        }
    }
}

/// Linear back-off, capped at `Duration::MAX`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

fn sleep_unless_cancelled(token: Option<&CancellationToken>, delay: Duration) -> bool {
    match token {
        Some(token) => token.wait_timeout(delay),
        None => {
            thread::sleep(delay);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idstore_storage::{InMemoryProvider, Record};
    use std::sync::atomic::AtomicU32;

    fn runner_with(provider: &InMemoryProvider, max_retries: u32) -> TransactionRunner {
        let config = Config::new()
            .max_retries(max_retries)
            .retry_base_delay(Duration::from_millis(1));
        TransactionRunner::new(Arc::new(provider.clone()), &config)
    }

    fn insert(tx: &Transaction, name: &str) -> CoreResult<i64> {
        tx.with_session(|s| {
            let key = s.allocate_key()?;
            s.insert(Record::new("group", key, Some(name.into()), vec![]))?;
            Ok(key)
        })
    }

    #[test]
    fn nested_required_commits_once() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);

        runner
            .run_in_transaction(|_| {
                runner.run_in_transaction(|tx| insert(tx, "a").map(|_| ()))?;
                runner.run_in_transaction(|tx| insert(tx, "b").map(|_| ()))
            })
            .unwrap();

        let stats = provider.stats();
        assert_eq!(stats.commits, 1);
        assert_eq!(stats.acquired, 1);
        assert_eq!(stats.open_sessions, 0);
        assert_eq!(provider.committed("group").len(), 2);
        assert!(!runner.has_thread_state());
    }

    #[test]
    fn separate_frame_survives_outer_failure() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);

        let err = runner
            .run_in_transaction(|tx| {
                insert(tx, "outer")?;
                runner.run_in_separate_transaction(|inner| {
                    assert!(inner.owns_session());
                    insert(inner, "separate")
                })?;
                Err(CoreError::aborted("outer fails"))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::Aborted { .. }));
        let names: Vec<_> = provider
            .committed("group")
            .into_iter()
            .filter_map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["separate".to_string()]);
    }

    #[test]
    fn retries_until_success() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 5);
        let calls = AtomicU32::new(0);

        let value = runner
            .run_in_transaction_ret(|_| {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(CoreError::conflict("simulated"))
                } else {
                    Ok(42)
                }
            })
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(provider.stats().open_sessions, 0);
    }

    #[test]
    fn exhausts_retry_budget() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);
        let calls = AtomicU32::new(0);

        let err = runner
            .run_in_transaction(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::conflict("simulated"))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.stats().acquired, 3);
        assert_eq!(provider.stats().released, 3);
    }

    #[test]
    fn zero_retries_still_runs_once() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 0);
        let calls = AtomicU32::new(0);
        let _ = runner.run_in_transaction(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CoreError::conflict("simulated"))
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn commit_conflicts_are_retried() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);
        provider.fail_next_commits(2);
        let calls = AtomicU32::new(0);

        runner
            .run_in_transaction(|tx| {
                calls.fetch_add(1, Ordering::SeqCst);
                insert(tx, "g").map(|_| ())
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(provider.committed("group").len(), 1);
    }

    #[test]
    fn nested_frames_do_not_retry() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);
        let inner_calls = AtomicU32::new(0);
        let outer_calls = AtomicU32::new(0);

        let _ = runner.run_in_transaction(|_| {
            outer_calls.fetch_add(1, Ordering::SeqCst);
            runner.run_in_transaction(|_| {
                inner_calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::conflict("simulated"))
            })
        });

        assert_eq!(outer_calls.load(Ordering::SeqCst), 3);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn swallowed_nested_failure_prevents_commit() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);

        let err = runner
            .run_in_transaction(|tx| {
                insert(tx, "outer")?;
                let _ = runner.run_in_transaction(|_| Err(CoreError::aborted("inner")));
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::RollbackOnly));
        assert!(provider.committed("group").is_empty());
    }

    #[test]
    fn failed_work_commits_nothing() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);

        let err = runner
            .run_in_transaction(|tx| {
                insert(tx, "n1")?;
                Err(CoreError::aborted("runtime failure"))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::Aborted { .. }));
        assert!(provider.committed("group").is_empty());
        assert_eq!(provider.stats().commits, 0);
    }

    #[test]
    fn manual_commit_without_auto_commit() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);

        runner
            .run_with(TxOptions::default().auto_commit(false), |tx| {
                insert(tx, "kept")?;
                tx.commit()?;
                insert(tx, "dropped").map(|_| ())
            })
            .unwrap();

        let names: Vec<_> = provider
            .committed("group")
            .into_iter()
            .filter_map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["kept".to_string()]);
    }

    #[test]
    fn panic_releases_session() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            runner.run_in_transaction(|tx| {
                insert(tx, "doomed")?;
                runner.run_in_transaction(|_| -> CoreResult<()> { panic!("boom") })
            })
        }));

        assert!(result.is_err());
        assert_eq!(provider.open_sessions(), 0);
        assert!(provider.committed("group").is_empty());
        assert!(!runner.has_thread_state());
    }

    #[test]
    fn cancelled_token_stops_before_first_attempt() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 3);
        let token = CancellationToken::new();
        token.cancel();

        let err = runner
            .run_with(TxOptions::default().cancel_token(token), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(provider.stats().acquired, 0);
    }

    #[test]
    fn cancellation_interrupts_backoff() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 10);
        let token = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let options = TxOptions::default()
            .retry_base_delay(Duration::from_secs(30))
            .cancel_token(token.clone());
        let err = runner
            .run_with(options, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                Err::<(), _>(CoreError::conflict("simulated"))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_delay_saturates() {
        assert_eq!(
            backoff_delay(Duration::from_millis(20), 3),
            Duration::from_millis(60)
        );
        assert_eq!(backoff_delay(Duration::MAX, 2), Duration::MAX);
    }

    #[test]
    fn cancellation_interrupts_unbounded_backoff() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 10);
        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let options = TxOptions::default()
            .retry_base_delay(Duration::MAX)
            .cancel_token(token);
        let err = runner
            .run_with(options, |_| Err::<(), _>(CoreError::conflict("simulated")))
            .unwrap_err();

        assert!(matches!(err, CoreError::Cancelled));
        assert_eq!(provider.stats().open_sessions, 0);
        canceller.join().unwrap();
    }

    #[test]
    fn non_conflict_errors_are_not_retried() {
        let provider = InMemoryProvider::new();
        let runner = runner_with(&provider, 5);
        let calls = AtomicU32::new(0);

        let err = runner
            .run_in_transaction(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CoreError::not_found("group", 7))
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::NotFound { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
