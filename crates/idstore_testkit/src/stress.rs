//! Concurrency stress helpers.

use crate::fixtures::{Counter, TestEnv};
use idstore_core::{CoreError, CoreResult, ObjectStore};
use idstore_storage::SessionProvider;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of worker threads.
    pub threads: usize,
    /// Units of work per thread.
    pub operations_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            operations_per_thread: 25,
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Units of work that committed.
    pub successful_ops: usize,
    /// Units of work that failed.
    pub failed_ops: usize,
    /// First error seen, if any.
    pub first_error: Option<String>,
    /// Conflicts reported by the provider during the run.
    pub conflicts: u64,
    /// Wall time.
    pub duration: Duration,
}

/// Creates counter `name` at zero.
pub fn create_counter(env: &TestEnv, name: &str) -> CoreResult<i64> {
    env.runner().run_in_transaction_ret(|tx| {
        env.counters.create(
            tx,
            &Counter {
                name: name.to_string(),
                value: 0,
            },
        )
    })
}

/// Reads counter `name`.
pub fn read_counter(env: &TestEnv, name: &str) -> CoreResult<i64> {
    env.runner()
        .run_in_transaction_ret(|tx| Ok(env.counters.get_by_name(tx, name)?.value.value))
}

/// Increments counter `name` by one in a read-modify-write unit of work.
pub fn increment(env: &TestEnv, name: &str) -> CoreResult<()> {
    env.runner().run_in_transaction(|tx| {
        let mut counter = env.counters.get_by_name(tx, name)?.value;
        counter.value += 1;
        env.counters.update_by_name(tx, name, &counter)
    })
}

/// Runs concurrent increments of counter `name` from several threads.
///
/// With enough retry budget every increment lands, so the final value equals
/// `threads * operations_per_thread`.
pub fn concurrent_increments(env: &TestEnv, name: &str, config: &StressConfig) -> StressResult {
    let conflicts_before = env.provider.stats().conflicts;
    let start = Instant::now();

    let outcomes: Vec<Result<(), CoreError>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..config.threads)
            .map(|_| {
                scope.spawn(|| {
                    (0..config.operations_per_thread)
                        .map(|_| increment(env, name))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        workers
            .into_iter()
            .flat_map(|w| w.join().expect("stress worker panicked"))
            .collect()
    });

    let successful_ops = outcomes.iter().filter(|r| r.is_ok()).count();
    let first_error = outcomes
        .iter()
        .find_map(|r| r.as_ref().err().map(ToString::to_string));
    StressResult {
        successful_ops,
        failed_ops: outcomes.len() - successful_ops,
        first_error,
        conflicts: env.provider.stats().conflicts - conflicts_before,
        duration: start.elapsed(),
    }
}
