//! Bounded worker pool for file jobs
//!
//! The walking thread stays the single writer of the report: it submits jobs
//! to a rayon pool and drains their results from a crossbeam channel. At most
//! `2 * workers` jobs are in flight, so memory stays bounded however large
//! the tree is. Workers check the shared abort flag before starting a job;
//! a job that was never started produces no result.

use crate::error::{Result, SafeCopyError};
use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};

/// Pool of copy workers
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with `workers` threads
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("safecopy-worker-{}", i))
            .build()
            .map_err(|e| SafeCopyError::config(format!("Failed to start worker pool: {}", e)))?;

        Ok(Self { pool, workers })
    }

    /// Number of worker threads
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Upper bound on jobs submitted but not yet drained
    pub fn max_in_flight(&self) -> usize {
        self.workers * 2
    }

    /// Run `body` on the current thread with a dispatcher into the pool
    ///
    /// Returns once `body` has returned and every submitted job has finished.
    pub fn in_scope<'scope, T, R>(
        &self,
        abort: &'scope AtomicBool,
        body: impl FnOnce(&mut Dispatcher<'_, 'scope, T>) -> R,
    ) -> R
    where
        T: Send + 'scope,
    {
        let limit = self.max_in_flight();
        self.pool.in_place_scope(|scope| {
            let (tx, rx) = unbounded();
            let mut dispatcher = Dispatcher {
                scope,
                tx,
                rx,
                in_flight: 0,
                limit,
                abort,
            };
            body(&mut dispatcher)
        })
    }
}

/// Submits jobs into a pool scope and hands back their results
pub struct Dispatcher<'a, 'scope, T> {
    scope: &'a rayon::Scope<'scope>,
    tx: Sender<Option<T>>,
    rx: Receiver<Option<T>>,
    in_flight: usize,
    limit: usize,
    abort: &'scope AtomicBool,
}

impl<'a, 'scope, T: Send + 'scope> Dispatcher<'a, 'scope, T> {
    /// Submit a job, first waiting for room if the pool is saturated
    ///
    /// Returns the results that finished in the meantime.
    pub fn submit<F>(&mut self, job: F) -> Vec<T>
    where
        F: FnOnce() -> T + Send + 'scope,
    {
        let mut done = self.poll();
        while self.in_flight >= self.limit {
            match self.recv() {
                Some(Some(result)) => done.push(result),
                Some(None) => {}
                None => break,
            }
        }

        let tx = self.tx.clone();
        let abort = self.abort;
        self.in_flight += 1;
        self.scope.spawn(move |_| {
            let result = if abort.load(Ordering::SeqCst) {
                None
            } else {
                Some(job())
            };
            let _ = tx.send(result);
        });

        done
    }

    /// Collect results that are already available
    pub fn poll(&mut self) -> Vec<T> {
        let mut done = Vec::new();
        while self.in_flight > 0 {
            match self.rx.try_recv() {
                Ok(result) => {
                    self.in_flight -= 1;
                    done.extend(result);
                }
                Err(_) => break,
            }
        }
        done
    }

    /// Wait for every job in flight
    pub fn drain(&mut self) -> Vec<T> {
        let mut done = Vec::new();
        while self.in_flight > 0 {
            match self.recv() {
                Some(result) => done.extend(result),
                None => break,
            }
        }
        done
    }

    /// Jobs submitted but not yet drained
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn recv(&mut self) -> Option<Option<T>> {
        let result = self.rx.recv().ok()?;
        self.in_flight -= 1;
        Some(result)
    }
}
