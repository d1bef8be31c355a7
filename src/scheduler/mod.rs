//! Build scheduler
//!
//! Bounded-concurrency task execution for module factory and build work.
//! Tasks run on the tokio runtime, gated by a semaphore; their results are
//! joined by a single integrating caller in a fixed order, so completion
//! order never leaks into the graph.

mod profile;

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

pub use profile::{compute_parallelism, ModuleProfile, ProfileSummary};

use crate::error::BuildError;

/// Default retry bound for transient errors
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Shared build-generation counter.
///
/// Bumping it marks every task scheduled under an older generation stale.
/// Stale tasks still run to completion; their results are dropped.
#[derive(Debug, Clone, Default)]
pub struct GenerationHandle(Arc<AtomicU64>);

impl GenerationHandle {
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Start a new generation, returning its number
    pub fn invalidate(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

/// Invocation counters for one build generation
#[derive(Debug, Default)]
pub struct BuildCounters {
    pub factory: AtomicUsize,
    pub restored: AtomicUsize,
    pub built: AtomicUsize,
    pub integrated: AtomicUsize,
    pub retries: AtomicUsize,
    pub discarded: AtomicUsize,
}

impl BuildCounters {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BuildStats {
        let get = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        BuildStats {
            factory: get(&self.factory),
            restored: get(&self.restored),
            built: get(&self.built),
            integrated: get(&self.integrated),
            retries: get(&self.retries),
            discarded: get(&self.discarded),
        }
    }
}

/// Plain snapshot of [`BuildCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Module reads and dependency resolutions
    pub factory: usize,
    /// Modules restored from the cache
    pub restored: usize,
    /// Modules built from source
    pub built: usize,
    pub integrated: usize,
    pub retries: usize,
    /// Task results dropped because their generation went stale
    pub discarded: usize,
}

impl BuildStats {
    /// Factory plus build invocations: the work a warm cache should save
    pub fn work(&self) -> usize {
        self.factory + self.built
    }
}

/// A scheduled unit of work.
pub struct Task<T> {
    handle: JoinHandle<T>,
    generation: u64,
}

impl<T> Task<T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the task. Returns `None` when its generation went stale
    /// meanwhile; a panicked task is an error.
    pub async fn join(self, scheduler: &BuildScheduler) -> Result<Option<T>> {
        let value = self
            .handle
            .await
            .map_err(|e| anyhow!("build task failed to complete: {}", e))?;

        if !scheduler.generations.is_current(self.generation) {
            trace!("Discarding result of stale generation {}", self.generation);
            BuildCounters::bump(&scheduler.counters.discarded);
            return Ok(None);
        }
        Ok(Some(value))
    }
}

/// Dispatches work onto a bounded pool.
pub struct BuildScheduler {
    permits: Arc<Semaphore>,
    concurrency: usize,
    generations: GenerationHandle,
    counters: Arc<BuildCounters>,
    max_retries: u32,
}

impl BuildScheduler {
    /// `concurrency == 0` picks the number of available cores
    pub fn new(concurrency: usize, max_retries: u32) -> Self {
        let concurrency = if concurrency == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            concurrency
        };
        debug!("Build scheduler with {} worker slot(s)", concurrency);

        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            generations: GenerationHandle::default(),
            counters: Arc::new(BuildCounters::default()),
            max_retries,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn generations(&self) -> &GenerationHandle {
        &self.generations
    }

    pub fn counters(&self) -> &Arc<BuildCounters> {
        &self.counters
    }

    /// Start a fresh set of counters, e.g. at the beginning of a generation
    pub fn reset_counters(&mut self) {
        self.counters = Arc::new(BuildCounters::default());
    }

    /// Run `work` once a worker slot is free.
    pub fn schedule<F, T>(&self, work: F) -> Task<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let handle = tokio::spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            work.await
        });
        Task {
            handle,
            generation: self.generations.current(),
        }
    }
}

/// Run `op`, retrying transient failures up to `max_retries` times.
///
/// Returns the final result and the number of retries spent. A transient
/// error that outlives the retries is reclassified as a resolution error.
pub async fn with_retries<T, F, Fut>(max_retries: u32, mut op: F) -> (Result<T, BuildError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BuildError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                debug!("Retrying after transient error ({}): {}", attempt, e);
                tokio::time::sleep(Duration::from_millis(5 * attempt as u64)).await;
            }
            Err(e) => return (Err(e.into_resolution()), attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let scheduler = BuildScheduler::new(2, 0);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                scheduler.schedule(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.join(&scheduler).await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_results_join_in_schedule_order() {
        let scheduler = BuildScheduler::new(4, 0);
        let tasks: Vec<_> = (0..4u64)
            .map(|i| {
                scheduler.schedule(async move {
                    tokio::time::sleep(Duration::from_millis(20 - i * 5)).await;
                    i
                })
            })
            .collect();

        let mut order = Vec::new();
        for task in tasks {
            order.push(task.join(&scheduler).await.unwrap().unwrap());
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_stale_results_are_discarded() {
        let scheduler = BuildScheduler::new(1, 0);
        let task = scheduler.schedule(async { 42 });
        scheduler.generations().invalidate();

        assert_eq!(task.join(&scheduler).await.unwrap(), None);
        assert_eq!(scheduler.counters().snapshot().discarded, 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let (result, retries) = with_retries(2, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BuildError::Io {
                        identifier: "a".to_string(),
                        reason: "busy".to_string(),
                        transient: true,
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded_and_reclassified() {
        let (result, retries): (Result<(), _>, u32) = with_retries(1, || async {
            Err(BuildError::Io {
                identifier: "a".to_string(),
                reason: "busy".to_string(),
                transient: true,
            })
        })
        .await;

        assert_eq!(retries, 1);
        assert!(matches!(result, Err(BuildError::Resolve { .. })));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let (result, retries): (Result<(), _>, u32) = with_retries(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(BuildError::build("a", "syntax error")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(retries, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
