//! Bounded worker pool for one batch of search hits.
//!
//! Items go into a shared FIFO queue drained by a fixed number of tokio tasks.
//! Each worker collects its own results; the vectors are merged back into
//! input order once every worker has finished, so no output is shared
//! between tasks.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

/// Runs async jobs over a list of items with at most `workers` in flight.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// `workers` is clamped to at least one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `job` to every item and return the results in input order.
    ///
    /// A job that panics loses only its own result; the worker that ran it
    /// moves on to the next queued item.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, job: F) -> Vec<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }

        let total = items.len();
        let worker_count = self.workers.min(total);
        let queue: VecDeque<(usize, T)> = items.into_iter().enumerate().collect();
        let queue = Arc::new(Mutex::new(queue));
        let job = Arc::new(job);

        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            let queue = Arc::clone(&queue);
            let job = Arc::clone(&job);

            handles.push(tokio::spawn(async move {
                let mut results = Vec::new();
                while let Some((index, item)) = next_item(&queue) {
                    // Own task per job: a panic surfaces as a JoinError here.
                    match tokio::spawn((*job)(item)).await {
                        Ok(result) => results.push((index, result)),
                        Err(e) => {
                            error!(worker, item = index, error = %e, "job failed, its result is lost");
                        }
                    }
                }
                debug!(worker, processed = results.len(), "worker drained queue");
                results
            }));
        }

        let mut collected = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(mut results) => collected.append(&mut results),
                Err(e) => error!(error = %e, "worker task failed, its results are lost"),
            }
        }
        collected.sort_unstable_by_key(|(index, _)| *index);
        collected.into_iter().map(|(_, result)| result).collect()
    }
}

fn next_item<T>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    // The lock is never held across a job, so poisoning leaves the queue intact.
    match queue.lock() {
        Ok(mut guard) => guard.pop_front(),
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}
