//! Self-rescheduling background polling.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{ReleaseWatchError, Result};
use crate::settings::GlobalSettings;
use crate::types::{CheckOptions, CheckSummary};
use crate::watcher::ReleaseWatcher;

/// Something the scheduler drives once per tick.
#[async_trait]
pub trait PollTarget: Send + Sync {
    /// Run one cycle.
    async fn poll(&self) -> Result<CheckSummary>;

    /// Minutes until the next cycle, read after every tick.
    async fn poll_interval_minutes(&self) -> Result<i64>;
}

#[async_trait]
impl PollTarget for ReleaseWatcher {
    async fn poll(&self) -> Result<CheckSummary> {
        self.check_for_new_releases(CheckOptions { skip_cache: true })
            .await
    }

    async fn poll_interval_minutes(&self) -> Result<i64> {
        Ok(self.settings().await?.check_interval_minutes)
    }
}

/// Delay before the next tick; never less than one minute.
pub fn next_delay(interval_minutes: i64) -> Duration {
    Duration::from_secs(interval_minutes.max(1) as u64 * 60)
}

struct Running {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs a [`PollTarget`] immediately on start and then after each computed delay.
///
/// The delay is recomputed from the target after every tick, so interval
/// changes apply from the next cycle on. A failed tick is logged and the loop
/// carries on.
pub struct PollingScheduler {
    target: Arc<dyn PollTarget>,
    running: Mutex<Option<Running>>,
}

impl PollingScheduler {
    pub fn new(target: Arc<dyn PollTarget>) -> Self {
        Self {
            target,
            running: Mutex::new(None),
        }
    }

    /// Spawns the polling loop. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Err(ReleaseWatchError::SchedulerRunning);
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run(self.target.clone(), stop_rx));
        *running = Some(Running { stop, handle });
        info!("Polling scheduler started");
        Ok(())
    }

    /// Stops the loop, letting a cycle in progress finish.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        let _ = running.stop.send(true);
        if let Err(e) = running.handle.await {
            error!(error = %e, "Polling task ended abnormally");
        }
        info!("Polling scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

async fn run(target: Arc<dyn PollTarget>, mut stop: watch::Receiver<bool>) {
    loop {
        match target.poll().await {
            Ok(summary) => debug!(
                checked = summary.checked,
                notifications_sent = summary.notifications_sent,
                "Scheduled check finished"
            ),
            Err(e) => error!(error = %e, "Scheduled check failed"),
        }

        let minutes = match target.poll_interval_minutes().await {
            Ok(minutes) => minutes,
            Err(e) => {
                warn!(error = %e, "Could not read check interval, using default");
                GlobalSettings::default().check_interval_minutes
            }
        };
        let delay = next_delay(minutes);
        debug!(delay_secs = delay.as_secs(), "Next check scheduled");

        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
