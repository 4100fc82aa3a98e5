// Loading indicator plumbing: in-flight counting and the minimum visible
// duration gate that keeps fast responses from flickering the indicator.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Floor applied to user-triggered operations unless configured otherwise.
pub const DEFAULT_MIN_DURATION: Duration = Duration::from_millis(300);

/// Sleep until `floor` has elapsed since `started_at`. Returns immediately
/// if it already has.
pub async fn wait_minimum_duration(started_at: Instant, floor: Duration) {
    tokio::time::sleep_until(started_at + floor).await;
}

// ---------------------------------------------------------------------------
// MinDurationGate
// ---------------------------------------------------------------------------

/// Derived boolean that rises with its source and, once raised, stays raised
/// for at least `floor` even if the source drops sooner.
///
/// The derivation runs on a spawned task which is aborted when the gate is
/// dropped, so a gate must be created inside a Tokio runtime.
pub struct MinDurationGate {
    rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl MinDurationGate {
    pub fn spawn(mut source: watch::Receiver<bool>, floor: Duration) -> Self {
        let initial = *source.borrow_and_update();
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut raised_at = initial.then(Instant::now);

            loop {
                if source.changed().await.is_err() {
                    break;
                }
                let pending = *source.borrow_and_update();

                if pending {
                    if raised_at.is_none() {
                        raised_at = Some(Instant::now());
                        tx.send_replace(true);
                        trace!("loading raised");
                    }
                    continue;
                }

                let Some(at) = raised_at else {
                    continue;
                };
                wait_minimum_duration(at, floor).await;

                // The source may have risen again while we held the signal.
                if *source.borrow_and_update() {
                    continue;
                }
                raised_at = None;
                tx.send_replace(false);
                trace!("loading lowered");
            }

            tx.send_replace(false);
        });

        Self { rx, task }
    }

    pub fn get(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }

    /// Stop deriving. The last published value stays readable.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for MinDurationGate {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// Count of wrapped operations currently running, plus the raw "anything
/// pending" flag derived from it.
pub struct InFlight {
    count: watch::Sender<usize>,
    pending: watch::Sender<bool>,
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlight {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        let (pending, _) = watch::channel(false);
        Self { count, pending }
    }

    /// Register an operation. The returned guard unregisters it exactly once
    /// when dropped, whether the operation succeeded, failed, or was
    /// cancelled.
    pub fn begin(&self) -> InFlightGuard<'_> {
        let mut is_root = false;
        self.count.send_modify(|n| {
            is_root = *n == 0;
            *n += 1;
        });
        self.pending.send_if_modified(|p| !std::mem::replace(p, true));

        InFlightGuard {
            owner: self,
            is_root,
            started_at: Instant::now(),
        }
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    pub fn subscribe_count(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.borrow()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<bool> {
        self.pending.subscribe()
    }

    fn end(&self) {
        let mut remaining = 0;
        self.count.send_modify(|n| {
            *n = n.saturating_sub(1);
            remaining = *n;
        });
        if remaining == 0 {
            self.pending.send_if_modified(|p| std::mem::replace(p, false));
        }
    }
}

/// Registration of one running operation. See [`InFlight::begin`].
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    is_root: bool,
    started_at: Instant,
}

impl InFlightGuard<'_> {
    /// True if no other operation was running when this one began.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Root callers hold the counter until `floor` has elapsed since they
    /// began; nested callers return immediately.
    pub async fn hold_floor(&self, floor: Duration) {
        if self.is_root {
            wait_minimum_duration(self.started_at, floor).await;
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.owner.end();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
