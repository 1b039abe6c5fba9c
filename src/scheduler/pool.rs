use std::sync::Arc;

use futures::channel::oneshot;
use futures::executor::block_on;
use threadpool::ThreadPool;

use crate::errors::{EngineError, EngineResult};
use crate::observability::metrics;
use crate::scheduler::shared_sender::SharedSender;

/// Fixed-size pool of worker threads that operator kernels fan out onto,
/// one task per partition.
///
/// Each partition's task runs in-process on a pool thread; the closure is
/// an `Arc<dyn Fn>` shared across the submissions -- no serialization step
/// is needed or performed.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> WorkerPool {
        let threads = threads.max(1);
        metrics::WORKER_POOL_THREADS.set(threads as f64);
        WorkerPool {
            pool: ThreadPool::new(threads),
        }
    }

    pub fn threads(&self) -> usize {
        self.pool.max_count()
    }

    /// Runs `f(p)` once for every `p` in `0..partitions`, blocking until
    /// all complete, and returns the results in partition order. An error
    /// from any partition is propagated to the caller; the remaining
    /// in-flight partitions still run to completion since the thread pool
    /// has already accepted their closures.
    pub fn map_partitions<T, F>(&self, partitions: u64, f: F) -> EngineResult<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(u64) -> EngineResult<T> + Send + Sync + 'static,
    {
        log::debug!("submitting {partitions} partition tasks to worker pool");
        let f = Arc::new(f);
        let mut receivers = Vec::with_capacity(partitions as usize);
        for p in 0..partitions {
            let (tx, rx) = oneshot::channel();
            let sender = SharedSender::new(tx);
            let f = Arc::clone(&f);
            metrics::TASKS_SUBMITTED.inc();
            self.pool.execute(move || {
                sender.send(f(p));
            });
            receivers.push(rx);
        }
        let mut out = Vec::with_capacity(partitions as usize);
        for rx in receivers {
            let result = block_on(rx)
                .map_err(|_| EngineError::ClosureExecutionFailure("worker dropped its result channel".into()))?;
            if result.is_err() {
                metrics::TASKS_FAILED.inc();
            }
            out.push(result?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn runs_one_task_per_partition_and_preserves_order() {
        let pool = WorkerPool::new(4);
        let results = pool
            .map_partitions(8, |p| Ok::<u64, EngineError>(p * 2))
            .unwrap();
        assert_eq!(results, (0..8).map(|p| p * 2).collect::<Vec<_>>());
    }

    #[test]
    fn propagates_worker_errors() {
        let pool = WorkerPool::new(2);
        let result = pool.map_partitions(4, |p| {
            if p == 2 {
                Err(EngineError::InvalidArgument("boom".into()))
            } else {
                Ok(p)
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn all_tasks_actually_execute() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        pool.map_partitions(16, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok::<(), EngineError>(())
        })
        .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }
}
