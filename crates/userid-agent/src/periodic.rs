//! Periodic background work.
//!
//! The connector keepalive probe and the aggregator flush both run as
//! independently scheduled tasks sharing one small capability: being ticked.
//! The scheduler holds a reference to that capability, not to either
//! concrete type.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a task wants the scheduler to do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    async fn on_tick(&self) -> TickOutcome;
}

/// Ticks `task` immediately and then once per period until the task asks to
/// stop or the token is cancelled. Ticks are serialized: a slow tick delays
/// the next one rather than overlapping it.
pub fn spawn_periodic(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if task.on_tick().await == TickOutcome::Stop {
                        break;
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountDown {
        remaining: AtomicU32,
    }

    #[async_trait]
    impl PeriodicTask for CountDown {
        async fn on_tick(&self) -> TickOutcome {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) <= 1 {
                TickOutcome::Stop
            } else {
                TickOutcome::Continue
            }
        }
    }

    #[tokio::test]
    async fn stops_when_the_task_asks_to() {
        let task = Arc::new(CountDown {
            remaining: AtomicU32::new(3),
        });
        let handle = spawn_periodic(
            Arc::clone(&task) as Arc<dyn PeriodicTask>,
            Duration::from_millis(5),
            CancellationToken::new(),
        );
        handle.await.unwrap();
        assert_eq!(task.remaining.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_tick_fires_immediately() {
        let task = Arc::new(CountDown {
            remaining: AtomicU32::new(1),
        });
        let handle = spawn_periodic(
            Arc::clone(&task) as Arc<dyn PeriodicTask>,
            Duration::from_secs(3600),
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("first tick should not wait for the period")
            .unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_task() {
        let task = Arc::new(CountDown {
            remaining: AtomicU32::new(u32::MAX),
        });
        let cancel = CancellationToken::new();
        let handle = spawn_periodic(
            Arc::clone(&task) as Arc<dyn PeriodicTask>,
            Duration::from_millis(5),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancelled task should stop")
            .unwrap();
    }
}
