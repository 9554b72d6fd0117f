//! Interval scheduler that triggers drain cycles.

use relay_drain::{DrainError, DrainOrchestrator};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Spawn the drain scheduler.
///
/// Each tick calls `try_run_once`, so a tick never queues behind a manual
/// trigger. A cycle in progress when shutdown arrives runs to completion.
pub fn spawn_scheduler(
    drain: Arc<DrainOrchestrator>,
    period: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "Drain scheduler started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Drain scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    match drain.try_run_once().await {
                        Ok(_) => {}
                        Err(DrainError::CycleInProgress) => {
                            debug!("Drain cycle already running, skipping tick");
                        }
                        Err(e) => {
                            warn!(error = %e, "Scheduled drain cycle failed");
                        }
                    }
                }
            }
        }

        debug!("Drain scheduler task stopped");
    })
}
