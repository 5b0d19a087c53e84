//! Bounded pool for delayed and periodic work
//!
//! Timers are plain tasks; the work they release runs only while holding one
//! of a fixed number of permits. Aborting a handle returned by
//! [`Scheduler::schedule`] cancels the timer, never work that already began.
//!
//! Work that must first wait for something else, such as a device lock, is
//! admitted before it takes a permit so a waiting task never occupies a worker.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Resolves once shutdown was requested or the sender is gone
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

#[derive(Clone)]
pub struct Scheduler {
    permits: Arc<Semaphore>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Scheduler {
    pub fn new(workers: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            shutdown: Arc::new(shutdown),
        }
    }

    /// Run `work` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule_admitted(delay, async {}, move |()| work)
    }

    /// Run `work` once after `delay`, handing it what `admit` resolved to.
    ///
    /// `admit` is awaited before a worker is taken.
    pub fn schedule_admitted<A, T, F, Fut>(&self, delay: Duration, admit: A, work: F) -> JoinHandle<()>
    where
        A: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scheduler = self.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => return,
            }

            // Detached: aborting the timer handle must not interrupt the work
            tokio::spawn(async move {
                let admitted = admit.await;
                let Some(_worker) = scheduler.worker().await else {
                    return;
                };
                work(admitted).await;
            });
        })
    }

    /// Wait for a free worker
    pub(crate) async fn worker(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }

    /// Run `task` every `period`, first after `period` has elapsed.
    ///
    /// A run that overlaps the next tick delays it instead of piling up. The
    /// task takes workers itself through [`Scheduler::worker`].
    pub fn every<F, Fut>(&self, period: Duration, mut task: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_requested(&mut shutdown) => break,
                }
                task().await;
            }
            debug!("Periodic task stopped");
        })
    }

    /// Stop releasing timers. Work already running completes.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_after_delay() {
        let scheduler = Scheduler::new(2);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        scheduler.schedule(Duration::from_secs(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_cancels_pending_timer() {
        let scheduler = Scheduler::new(2);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        let handle = scheduler.schedule(Duration::from_secs(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        handle.abort();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_does_not_interrupt_started_work() {
        let scheduler = Scheduler::new(2);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        let handle = scheduler.schedule(Duration::from_secs(1), async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.abort();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_is_bounded_by_permits() {
        let scheduler = Scheduler::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = ran.clone();
            scheduler.schedule(Duration::ZERO, async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_ticks_until_shutdown() {
        let scheduler = Scheduler::new(1);
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        scheduler.every(Duration::from_secs(20), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        scheduler.shutdown();
        assert!(scheduler.is_shut_down());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_wait_does_not_hold_a_worker() {
        let scheduler = Scheduler::new(1);
        let gate = Arc::new(tokio::sync::Mutex::new(()));
        let held = gate.clone().lock_owned().await;
        let ran = Arc::new(AtomicUsize::new(0));

        let blocked = gate.clone();
        scheduler.schedule_admitted(
            Duration::ZERO,
            async move { blocked.lock_owned().await },
            |_guard| async {},
        );

        let counter = ran.clone();
        scheduler.schedule(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        drop(held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_timers() {
        let scheduler = Scheduler::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = ran.clone();
        scheduler.schedule(Duration::from_secs(5), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.shutdown();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
