//! Periodic flush timer.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::SohEngine;

/// How often the engine checks whether to flush.
pub const FLUSH_TICK: Duration = Duration::from_millis(250);

/// Silence required since the last consumed batch before a flush.
pub const QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Start ticking `engine` every [`FLUSH_TICK`], first tick one period from now.
pub(crate) fn spawn(engine: SohEngine) -> FlushHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + FLUSH_TICK, FLUSH_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    engine.on_timer_tick();
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("SOH flush timer stopped");
    });

    FlushHandle { stop_tx, task }
}

/// Handle for the background flush timer.
///
/// Dropping the handle also stops the timer.
#[derive(Debug)]
pub struct FlushHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FlushHandle {
    /// Stop the timer.
    pub fn stop(self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stop the timer and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
