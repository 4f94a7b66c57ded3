//! Bounded worker pool
//!
//! A fixed number of scoped threads drain a shared job queue. Each worker
//! checks the cancellation token before taking the next job; a job already
//! taken always runs to completion. `run` returns once every worker has
//! finished.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;

use crate::cancel::CancelToken;

/// Default number of workers
pub const DEFAULT_WORKERS: usize = 5;

/// Outcome of one job
#[derive(Debug)]
pub enum JobResult<T, E> {
    Done(T),
    Failed(E),
    /// Never started because the run was cancelled
    Cancelled,
}

/// Fixed-size pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: usize,
    cancel: CancelToken,
}

impl WorkerPool {
    pub fn new(workers: usize, cancel: CancelToken) -> Self {
        Self {
            workers: workers.max(1),
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` over `jobs`, at most `workers` at a time.
    ///
    /// Results come back in job order.
    pub fn run<J, T, E, F>(&self, jobs: Vec<J>, f: F) -> Vec<JobResult<T, E>>
    where
        J: Send,
        T: Send,
        E: Send,
        F: Fn(J) -> Result<T, E> + Sync,
    {
        let total = jobs.len();
        let queue: Mutex<VecDeque<(usize, J)>> = Mutex::new(jobs.into_iter().enumerate().collect());
        let results: Mutex<Vec<Option<JobResult<T, E>>>> =
            Mutex::new((0..total).map(|_| None).collect());

        let span = tracing::Span::current();
        thread::scope(|scope| {
            for _ in 0..self.workers.min(total) {
                scope.spawn(|| loop {
                    let _entered = span.enter();
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let next = match queue.lock() {
                        Ok(mut q) => q.pop_front(),
                        Err(_) => None,
                    };
                    let Some((idx, job)) = next else {
                        break;
                    };
                    let outcome = match f(job) {
                        Ok(value) => JobResult::Done(value),
                        Err(err) => JobResult::Failed(err),
                    };
                    if let Ok(mut slots) = results.lock() {
                        slots[idx] = Some(outcome);
                    }
                });
            }
        });

        results
            .into_inner()
            .unwrap_or_default()
            .into_iter()
            .map(|slot| slot.unwrap_or(JobResult::Cancelled))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_runs_all_jobs_in_order() {
        let pool = WorkerPool::new(3, CancelToken::new());
        let results = pool.run((0..20).collect(), |n: u32| -> Result<u32, String> { Ok(n * 2) });
        let values: Vec<u32> = results
            .into_iter()
            .map(|r| match r {
                JobResult::Done(v) => v,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(values, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2, CancelToken::new());
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        pool.run((0..8).collect(), |_: u32| -> Result<(), ()> {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_failures_do_not_stop_siblings() {
        let pool = WorkerPool::new(2, CancelToken::new());
        let results = pool.run(vec![1, 2, 3, 4], |n: i32| if n % 2 == 0 { Err(n) } else { Ok(n) });
        let failed = results.iter().filter(|r| matches!(r, JobResult::Failed(_))).count();
        let done = results.iter().filter(|r| matches!(r, JobResult::Done(_))).count();
        assert_eq!((done, failed), (2, 2));
    }

    #[test]
    fn test_cancel_stops_dispatch() {
        let cancel = CancelToken::new();
        let pool = WorkerPool::new(1, cancel.clone());
        let results = pool.run((0..5).collect(), |n: u32| -> Result<u32, ()> {
            if n == 1 {
                cancel.cancel();
            }
            Ok(n)
        });
        assert!(matches!(results[0], JobResult::Done(0)));
        // the job that requested cancellation still finished
        assert!(matches!(results[1], JobResult::Done(1)));
        assert!(results[2..].iter().all(|r| matches!(r, JobResult::Cancelled)));
    }
}
