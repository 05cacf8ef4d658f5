use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

/// Bounded cooperative worker pool for response processing.
///
/// At most `capacity` submitted tasks execute at once; the rest queue FIFO
/// on the semaphore. A task's panic or error surfaces only on its own
/// handle and never stops the pool. Tasks are never cancelled here; the
/// orchestrator owns the run-wide deadline.
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl ConcurrencyLimiter {
    /// Capacity below 1 is a configuration error caught by options
    /// validation; it is clamped here so a raw constructor cannot wedge
    /// the pool.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
            running: Arc::new(AtomicUsize::new(0)),
            pending: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Submit one unit of work. The returned handle resolves with the task's
    /// result once a slot frees up and the task runs.
    pub fn submit<F, T>(&self, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let running = self.running.clone();
        let pending = self.pending.clone();
        let idle = self.idle.clone();

        pending.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition cannot fail.
            let _permit = semaphore.acquire_owned().await.ok();

            // Increment running before releasing pending so `in_flight`
            // never transiently reads zero while work remains.
            running.fetch_add(1, Ordering::SeqCst);
            pending.fetch_sub(1, Ordering::SeqCst);
            let _guard = CompletionGuard { running, idle };

            task.await
        })
    }

    /// Tasks currently executing. Never exceeds the capacity.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a slot.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.running() + self.pending()
    }

    /// Resolves once every submitted task has finished. Later submissions
    /// are still honored; the orchestrator promises not to make any once a
    /// drain has started.
    pub async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Marks a task finished even if it panics.
struct CompletionGuard {
    running: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.idle.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn never_runs_more_than_capacity_at_once() {
        const CAPACITY: usize = 3;
        let limiter = ConcurrencyLimiter::new(CAPACITY);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(limiter.submit(async move {
                let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5)).await;
                concurrent.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for handle in handles {
            handle.await.expect("task");
        }
        assert!(peak.load(Ordering::SeqCst) <= CAPACITY);
        assert!(limiter.running() <= CAPACITY);
    }

    #[tokio::test]
    async fn drain_waits_for_every_task() {
        let limiter = ConcurrencyLimiter::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let done = done.clone();
            limiter.submit(async move {
                sleep(Duration::from_millis(2)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        limiter.drain().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(limiter.running(), 0);
        assert_eq!(limiter.pending(), 0);
    }

    #[tokio::test]
    async fn drain_on_an_idle_pool_returns_immediately() {
        let limiter = ConcurrencyLimiter::new(1);
        limiter.drain().await;
    }

    #[tokio::test]
    async fn a_failing_task_does_not_stop_the_pool() {
        let limiter = ConcurrencyLimiter::new(1);

        let failing = limiter.submit(async {
            panic!("worker exploded");
        });
        assert!(failing.await.is_err());

        let ok = limiter.submit(async { 7 });
        assert_eq!(ok.await.expect("task"), 7);
        limiter.drain().await;
    }

    #[tokio::test]
    async fn task_results_come_back_on_the_handle() {
        let limiter = ConcurrencyLimiter::new(2);
        let handle = limiter.submit(async { "outcome" });
        assert_eq!(handle.await.expect("task"), "outcome");
    }

    #[tokio::test]
    async fn zero_capacity_is_clamped_rather_than_wedged() {
        let limiter = ConcurrencyLimiter::new(0);
        let handle = limiter.submit(async { 1 });
        assert_eq!(handle.await.expect("task"), 1);
    }
}
