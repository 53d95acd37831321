//! Restartable one-shot timer.
//!
//! Each [`RestartableTimer::schedule`] call replaces whatever was pending, so
//! the callback only fires once the timer has gone `delay` without being
//! rescheduled. Useful for "flush after a quiet period" behaviour.

use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A one-shot delayed callback that can be rescheduled or cancelled.
///
/// Dropping the timer cancels any pending run.
#[derive(Default)]
pub struct RestartableTimer {
    task: Option<JoinHandle<()>>,
    token: Option<CancellationToken>,
}

impl RestartableTimer {
    /// Create an idle timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a scheduled callback has neither fired nor been cancelled.
    pub fn pending(&self) -> bool {
        let cancelled = self.token.as_ref().is_none_or(CancellationToken::is_cancelled);
        !cancelled && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the pending run, if any.
    ///
    /// A callback that already started is left to finish.
    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.task = None;
    }

    /// Cancel anything pending and run `callback` after `delay`.
    pub fn schedule<F>(&mut self, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(delay, callback.boxed(), None);
    }

    /// Like [`schedule`](Self::schedule), but run `on_cancel` instead of the
    /// callback if this run is cancelled before it fires.
    pub fn schedule_with_on_cancel<F, C>(&mut self, delay: Duration, callback: F, on_cancel: C)
    where
        F: Future<Output = ()> + Send + 'static,
        C: Future<Output = ()> + Send + 'static,
    {
        self.spawn(delay, callback.boxed(), Some(on_cancel.boxed()));
    }

    /// Schedule only if nothing is pending; returns whether it scheduled.
    pub fn schedule_no_restart<F>(&mut self, delay: Duration, callback: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.pending() {
            return false;
        }
        self.schedule(delay, callback);
        true
    }

    fn spawn(
        &mut self,
        delay: Duration,
        callback: BoxFuture<'static, ()>,
        on_cancel: Option<BoxFuture<'static, ()>>,
    ) {
        self.cancel();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => callback.await,
                () = cancelled.cancelled() => {
                    if let Some(on_cancel) = on_cancel {
                        on_cancel.await;
                    }
                }
            }
        });
        self.token = Some(token);
        self.task = Some(task);
    }
}

impl Drop for RestartableTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_callback(count: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let count = count.clone();
        async move {
            let _ = count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = RestartableTimer::new();
        timer.schedule(Duration::from_millis(100), counter_callback(&count));
        assert!(timer.pending());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.pending());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_restarts_the_delay() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = RestartableTimer::new();
        timer.schedule(Duration::from_millis(100), counter_callback(&count));
        tokio::time::sleep(Duration::from_millis(60)).await;
        timer.schedule(Duration::from_millis(100), counter_callback(&count));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut timer = RestartableTimer::new();
        timer.schedule(Duration::from_millis(100), counter_callback(&count));
        timer.cancel();
        assert!(!timer.pending());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn on_cancel_runs_instead() {
        let fired = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        let mut timer = RestartableTimer::new();
        timer.schedule_with_on_cancel(
            Duration::from_millis(100),
            counter_callback(&fired),
            counter_callback(&cancelled),
        );
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_no_restart_keeps_pending_run() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut timer = RestartableTimer::new();
        assert!(timer.schedule_no_restart(Duration::from_millis(100), counter_callback(&first)));
        assert!(!timer.schedule_no_restart(Duration::from_millis(10), counter_callback(&second)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        // Idle again, so a new run is accepted
        assert!(timer.schedule_no_restart(Duration::from_millis(10), counter_callback(&second)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let mut timer = RestartableTimer::new();
            timer.schedule(Duration::from_millis(50), counter_callback(&count));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn idle_timer_not_pending() {
        let timer = RestartableTimer::new();
        assert!(!timer.pending());
    }
}
