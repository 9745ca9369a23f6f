//! Timers and execution contexts for busting tasks.
//!
//! World-mutating work only runs on the primary context: a single job
//! queue drained by one consumer. Timers live on the tokio runtime and
//! hand their bodies to the primary queue, waiting for each body to
//! return before arming the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// A unit of work for the primary context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Sending side of the primary context
#[derive(Clone, Debug)]
pub struct PrimaryContext {
    tx: mpsc::UnboundedSender<Job>,
}

impl PrimaryContext {
    /// Create a primary context and the queue that drains it.
    pub fn channel() -> (PrimaryContext, PrimaryQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PrimaryContext { tx }, PrimaryQueue { rx })
    }

    /// Queue a job. Returns false once the queue has been dropped.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

/// Receiving side of the primary context. Exactly one consumer exists.
pub struct PrimaryQueue {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl PrimaryQueue {
    /// Run every job queued so far (non-blocking)
    ///
    /// For hosts that pump the queue from their own main loop.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Run jobs until every [`PrimaryContext`] is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            job();
        }
        log::debug!("Primary queue closed");
    }
}

/// Returned by a periodic body to keep or stop its timer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Handle to a scheduled timer
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl TimerHandle {
    /// Stop the timer. A body already queued on the primary context
    /// sees the flag and does not run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.join.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// True once the timer will never fire again
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the timer to stop, by cancellation or by its body.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Drives timers on a tokio runtime and runs their bodies on the
/// primary context.
#[derive(Clone, Debug)]
pub struct TaskScheduler {
    handle: Handle,
    primary: PrimaryContext,
}

impl TaskScheduler {
    pub fn new(handle: Handle, primary: PrimaryContext) -> Self {
        Self { handle, primary }
    }

    /// Create a scheduler on the current tokio runtime.
    ///
    /// Panics if called outside a tokio runtime context.
    pub fn current(primary: PrimaryContext) -> Self {
        Self::new(Handle::current(), primary)
    }

    pub fn primary(&self) -> &PrimaryContext {
        &self.primary
    }

    /// Run `body` on the primary context after `delay`, then every
    /// `period` until it returns [`TickControl::Stop`] or the timer is
    /// cancelled. The next tick is only armed after the previous body
    /// returned; late ticks are delayed, never doubled up.
    pub fn run_periodically<F>(&self, delay: Duration, period: Duration, body: F) -> TimerHandle
    where
        F: FnMut() -> TickControl + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let primary = self.primary.clone();
        let period = period.max(Duration::from_millis(1));

        let join = self.handle.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + delay, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut body = body;

            loop {
                ticker.tick().await;
                if flag.load(Ordering::Acquire) {
                    break;
                }

                // The body travels to the primary context and comes back
                // with its verdict.
                let (tx, rx) = oneshot::channel();
                let job_flag = Arc::clone(&flag);
                let posted = primary.post(move || {
                    let mut body = body;
                    let control = if job_flag.load(Ordering::Acquire) {
                        TickControl::Stop
                    } else {
                        body()
                    };
                    let _ = tx.send((body, control));
                });
                if !posted {
                    log::warn!("Primary context closed, stopping timer");
                    break;
                }

                match rx.await {
                    Ok((returned, TickControl::Continue)) => body = returned,
                    Ok((_, TickControl::Stop)) | Err(_) => break,
                }
            }
        });

        TimerHandle { cancelled, join }
    }

    /// Run `job` once on the primary context after `delay`.
    pub fn run_later<F>(&self, delay: Duration, job: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let primary = self.primary.clone();

        let join = self.handle.spawn(async move {
            time::sleep(delay).await;
            if flag.load(Ordering::Acquire) {
                return;
            }
            let job_flag = Arc::clone(&flag);
            primary.post(move || {
                if !job_flag.load(Ordering::Acquire) {
                    job();
                }
            });
        });

        TimerHandle { cancelled, join }
    }

    /// Run `work` on the background context, then hand its output to
    /// `then` on the primary context.
    ///
    /// `work` must not touch live world state; it only sees what it was
    /// given.
    pub fn run_background_then<T, W, R>(&self, work: W, then: R)
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        R: FnOnce(T) + Send + 'static,
    {
        let primary = self.primary.clone();
        self.handle.spawn(async move {
            match tokio::task::spawn_blocking(work).await {
                Ok(output) => {
                    primary.post(move || then(output));
                }
                Err(e) => log::error!("Background job failed: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> TaskScheduler {
        let (primary, queue) = PrimaryContext::channel();
        tokio::spawn(queue.run());
        TaskScheduler::current(primary)
    }

    #[test]
    fn test_run_pending_drains_in_order() {
        let (primary, mut queue) = PrimaryContext::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            assert!(primary.post(move || seen.lock().unwrap().push(i)));
        }

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(queue.run_pending(), 0);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);

        drop(queue);
        assert!(!primary.post(|| {}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_stops_when_body_says_so() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let start = Instant::now();

        let timer = scheduler.run_periodically(
            Duration::from_millis(100),
            Duration::from_millis(50),
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    TickControl::Stop
                } else {
                    TickControl::Continue
                }
            },
        );
        timer.join().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires_again() {
        let scheduler = scheduler();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let timer = scheduler.run_periodically(Duration::ZERO, Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickControl::Continue
        });

        time::sleep(Duration::from_millis(250)).await;
        timer.cancel();
        assert!(timer.is_cancelled());
        let fired = count.load(Ordering::SeqCst);
        assert_eq!(fired, 3);

        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(count.load(Ordering::SeqCst), fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_later_respects_cancel() {
        let scheduler = scheduler();
        let fired = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&fired);
        let kept = scheduler.run_later(Duration::from_millis(10), move || {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&fired);
        let dropped = scheduler.run_later(Duration::from_millis(10), move || {
            b.fetch_add(10, Ordering::SeqCst);
        });
        dropped.cancel();

        kept.join().await;
        time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_background_result_resumes_on_primary() {
        let scheduler = scheduler();
        let (tx, rx) = oneshot::channel();

        scheduler.run_background_then(
            || (1..=10).sum::<i32>(),
            move |total| {
                let _ = tx.send(total);
            },
        );

        assert_eq!(rx.await.unwrap(), 55);
    }
}
