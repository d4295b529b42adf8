//! `interval` trigger source (§4.4): wait until `start` (or immediately),
//! fire once, then fire every `every` until stopped.

use crate::dispatch::{Dispatch, DispatchOrigin};
use chrono::{DateTime, Duration, Utc};
use claudecron_core::TaskId;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A live interval timer for one task. Dropping this without calling
/// [`IntervalSource::stop`] leaves the background timer running; callers
/// that own a task's lifecycle should always call `stop`.
pub struct IntervalSource {
    handle: JoinHandle<()>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl IntervalSource {
    /// Spawns the timer loop. A task unscheduled during the initial delay
    /// (i.e. `stop` called before the first fire) never fires.
    pub fn spawn(
        task_id: TaskId,
        every: Duration,
        start: Option<DateTime<Utc>>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let every_std = to_std_duration(every);

        let handle = tokio::spawn(async move {
            if let Some(start) = start {
                let now = Utc::now();
                if start > now {
                    let delay = to_std_duration(start - now);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {},
                        _ = &mut stop_rx => return,
                    }
                }
            }

            loop {
                let _ = dispatch.dispatch(task_id, DispatchOrigin::Interval, None).await;
                tokio::select! {
                    () = tokio::time::sleep(every_std) => {},
                    _ = &mut stop_rx => return,
                }
            }
        });

        Self { handle, stop_tx: Some(stop_tx) }
    }

    /// Cancels whichever timer (initial delay or periodic) is currently
    /// armed and stops the loop. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for IntervalSource {
    fn drop(&mut self) {
        self.stop();
        self.handle.abort();
    }
}

fn to_std_duration(duration: Duration) -> StdDuration {
    duration.to_std().unwrap_or(StdDuration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchedulerError;
    use crate::execution::Execution;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    struct CountingDispatch(Arc<AtomicU32>);

    #[async_trait]
    impl Dispatch for CountingDispatch {
        async fn dispatch(
            &self,
            task_id: TaskId,
            _origin: DispatchOrigin,
            _context: Option<crate::execution::TriggerContext>,
        ) -> Result<Execution, SchedulerError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Execution::skipped(task_id, "interval", None))
        }
    }

    #[tokio::test]
    async fn fires_immediately_then_periodically() {
        let count = Arc::new(AtomicU32::new(0));
        let mut source = IntervalSource::spawn(
            TaskId::new(),
            Duration::milliseconds(20),
            None,
            Arc::new(CountingDispatch(count.clone())),
        );
        tokio::time::sleep(StdDuration::from_millis(55)).await;
        source.stop();
        // One immediate fire plus at least one periodic fire.
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn stop_during_initial_delay_prevents_any_fire() {
        let count = Arc::new(AtomicU32::new(0));
        let mut source = IntervalSource::spawn(
            TaskId::new(),
            Duration::seconds(60),
            Some(Utc::now() + Duration::seconds(60)),
            Arc::new(CountingDispatch(count.clone())),
        );
        source.stop();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
