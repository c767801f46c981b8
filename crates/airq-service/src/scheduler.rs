//! Background task that flushes the ingestion buffer on a fixed period.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use crate::ingest::Ingestor;

/// Handle to the periodic flush task.
///
/// Ticks that land while a flush is still running are skipped rather than
/// queued, so at most one flush is ever in flight.
pub struct FlushScheduler {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushScheduler {
    /// Spawn the flush task. The first tick fires one `period` from now.
    pub fn start(ingestor: Arc<Ingestor>, period: Duration) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        info!("Flushing buffered records every {}s", period.as_secs());
        let handle = tokio::spawn(run(ingestor, period, stop_rx));
        Self { stop_tx, handle }
    }

    /// Stop ticking and wait for the task to exit.
    ///
    /// A flush already in progress completes first. This does not flush what
    /// is still pending; see [`Ingestor::shutdown`].
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("Flush scheduler task failed: {}", e);
        }
    }
}

async fn run(ingestor: Arc<Ingestor>, period: Duration, mut stop_rx: watch::Receiver<bool>) {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = stop_rx.changed() => {
                debug!("Flush scheduler stopping");
                break;
            }
        }

        match ingestor.flush_tick().await {
            None => {}
            Some(Ok(written)) => {
                if consecutive_failures > 0 {
                    info!(
                        "Periodic flush recovered after {} failures",
                        consecutive_failures
                    );
                }
                consecutive_failures = 0;
                if written > 0 {
                    debug!("Periodic flush wrote {} records", written);
                }
            }
            Some(Err(e)) => {
                consecutive_failures += 1;
                if consecutive_failures == 4 {
                    error!(
                        "Periodic flush failed {} times in a row, records stay pending: {}",
                        consecutive_failures, e
                    );
                }
            }
        }
    }
}
