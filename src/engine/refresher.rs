//! Background refresh of the active set.
//!
//! One task per oracle. Each cycle force-fetches every active asset, then
//! sleeps for the throttler's current interval. The task holds only a weak
//! reference, so dropping the oracle also ends it.

use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::oracle::PriceOracle;

/// Stop signal plus join handle of a running refresher.
pub(crate) struct RefresherHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefresherHandle {
    /// Signal stop and wait up to `timeout` for the current cycle to end.
    /// Aborts the task if it does not finish in time.
    pub async fn stop(mut self, timeout: Duration) {
        let _ = self.stop.send(true);
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => info!("Background refresher joined"),
            Ok(Err(e)) => warn!(error = %e, "Background refresher ended abnormally"),
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Background refresher did not stop in time, aborting"
                );
                self.task.abort();
            }
        }
    }
}

pub(crate) fn spawn(oracle: Weak<PriceOracle>) -> RefresherHandle {
    let (stop, stopped) = watch::channel(false);
    let task = tokio::spawn(run(oracle, stopped));
    RefresherHandle { stop, task }
}

async fn run(oracle: Weak<PriceOracle>, mut stopped: watch::Receiver<bool>) {
    info!("Background refresher started");
    loop {
        if *stopped.borrow() {
            break;
        }
        let Some(strong) = oracle.upgrade() else {
            break;
        };
        strong.refresh_active().await;
        let interval = strong.current_interval();
        drop(strong);

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            // Err means the sender is gone along with the oracle.
            _ = stopped.changed() => break,
        }
    }
    info!("Background refresher stopped");
}
