//! Cancellable one-shot delay used to approximate exposure/focus
//! convergence: the still capture is deliberately fired a fixed number of
//! preview frame-intervals after the preview starts, rather than being
//! synchronized to an explicit converged signal from the hardware.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type ElapsedCallback = Box<dyn FnOnce() + Send + 'static>;

struct TimerState {
    /// Set while a scheduled callback is still allowed to fire.
    armed: bool,
    /// Bumped on every start/cancel so a stale sleep task can never fire.
    generation: u64,
    task: Option<JoinHandle<()>>,
}

/// One-shot convergence delay.
///
/// `cancel` is idempotent and gives a hard guarantee: once it returns, the
/// callback will not run. The callback executes under the timer's internal
/// lock, so it must be cheap and must not call back into the timer.
pub struct ConvergenceTimer {
    state: Arc<Mutex<TimerState>>,
}

impl ConvergenceTimer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState {
                armed: false,
                generation: 0,
                task: None,
            })),
        }
    }

    /// Schedule `on_elapsed` to run after `frame_count * frame_interval`.
    ///
    /// A previously scheduled callback that has not fired yet is cancelled
    /// by the new schedule.
    pub fn start<F>(&self, frame_count: u32, frame_interval: Duration, on_elapsed: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = frame_interval * frame_count;
        let mut state = self.state.lock();

        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.generation += 1;
        state.armed = true;
        let generation = state.generation;

        trace!(
            "Convergence timer armed: {} frames x {:?} = {:?}",
            frame_count,
            frame_interval,
            delay
        );

        let shared = Arc::clone(&self.state);
        let callback: ElapsedCallback = Box::new(on_elapsed);
        state.task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // The armed check and the callback run under one lock
            // acquisition; a concurrent cancel either disarms first or
            // blocks until the callback has finished.
            let mut state = shared.lock();
            if state.armed && state.generation == generation {
                state.armed = false;
                state.task = None;
                callback();
            }
        }));
    }

    /// Cancel the pending callback. Once this returns, `on_elapsed` will
    /// not fire. Safe to call any number of times.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if state.armed {
            debug!("Convergence timer cancelled");
        }
        state.armed = false;
        state.generation += 1;
        if let Some(task) = state.task.take() {
            task.abort();
        }
    }

    /// Whether a callback is currently scheduled.
    pub fn is_armed(&self) -> bool {
        self.state.lock().armed
    }
}

impl Default for ConvergenceTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConvergenceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fires_after_the_configured_delay() {
        let timer = ConvergenceTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        timer.start(2, Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn never_fires_after_cancel() {
        let timer = ConvergenceTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..1000 {
            let counter = Arc::clone(&fired);
            timer.start(1, Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            timer.cancel();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let timer = ConvergenceTimer::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        timer.start(1, Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        timer.cancel();
        timer.cancel();
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn restart_supersedes_previous_schedule() {
        let timer = ConvergenceTimer::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        timer.start(1, Duration::from_millis(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let counter = Arc::clone(&second);
        timer.start(1, Duration::from_millis(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
