// Feature-flag poller: refreshes a flag snapshot on a fixed interval.
//
// Flags are best-effort. Fetch failures are dropped without retry or
// backoff, and the last good snapshot stays published.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::gateway::FlagsApi;
use crate::model::FlagMap;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shortest interval `start` accepts; anything below is raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct FlagPoller {
    api: Arc<dyn FlagsApi>,
    flags: watch::Sender<FlagMap>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FlagPoller {
    pub fn new(api: Arc<dyn FlagsApi>) -> Self {
        let (flags, _) = watch::channel(FlagMap::new());
        Self {
            api,
            flags,
            task: Mutex::new(None),
        }
    }

    /// Cancel any running poll, fetch immediately, then re-fetch every
    /// `interval` (at least [`MIN_POLL_INTERVAL`]). Must be called inside a
    /// Tokio runtime.
    pub fn start(&self, interval: Duration) {
        self.stop();

        if interval < MIN_POLL_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                "Flag poll interval too short; using the minimum"
            );
        }
        let interval = interval.max(MIN_POLL_INTERVAL);

        let api = Arc::clone(&self.api);
        let flags = self.flags.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // First tick completes immediately.
                ticker.tick().await;
                match api.fetch_flags().await {
                    Ok(snapshot) => {
                        flags.send_if_modified(|current| {
                            if *current == snapshot {
                                return false;
                            }
                            *current = snapshot;
                            true
                        });
                    }
                    Err(e) => debug!("Flag fetch failed: {}", e),
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "Flag polling started");
        *self.lock_task() = Some(handle);
    }

    /// Stop polling. Safe to call when not running.
    pub fn stop(&self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
            info!("Flag polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn flags(&self) -> FlagMap {
        self.flags.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlagMap> {
        self.flags.subscribe()
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        // The guarded value is a plain handle slot, so a poisoned lock is
        // still usable.
        self.task.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FlagPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
