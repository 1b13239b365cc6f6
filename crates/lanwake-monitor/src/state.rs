//! Per-machine monitor state.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tokio::time::{Duration, Instant};

/// Where a probe session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    /// Created, first probe not issued yet.
    Pending,
    /// Probing.
    Checking,
    Online,
    /// All attempts exhausted.
    Timeout,
    Cancelled,
    /// Machine has no IP configured; nothing to probe.
    NoIp,
}

impl MonitorStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            MonitorStatus::Online
                | MonitorStatus::Timeout
                | MonitorStatus::Cancelled
                | MonitorStatus::NoIp
        )
    }
}

/// Poll response. `finished` is derived from `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    pub machine_id: i64,
    pub machine_name: String,
    pub ip_address: String,
    pub status: MonitorStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Seconds since the session started, one decimal.
    pub elapsed: f64,
    pub finished: bool,
}

struct Progress {
    status: MonitorStatus,
    attempts: u32,
    finished_at: Option<Instant>,
}

/// One probe session. Mutated only by its own probe loop; the registry and
/// callers only read it or raise the cancel flag.
pub(crate) struct MonitorSlot {
    pub(crate) machine_id: i64,
    pub(crate) machine_name: String,
    pub(crate) ip_address: String,
    pub(crate) max_attempts: u32,
    pub(crate) generation: u64,
    started_at: Instant,
    progress: Mutex<Progress>,
    cancel_requested: AtomicBool,
    cancel_notify: Notify,
}

impl MonitorSlot {
    pub(crate) fn new(
        machine_id: i64,
        machine_name: &str,
        ip_address: &str,
        max_attempts: u32,
        generation: u64,
        status: MonitorStatus,
    ) -> Self {
        let now = Instant::now();
        Self {
            machine_id,
            machine_name: machine_name.to_string(),
            ip_address: ip_address.to_string(),
            max_attempts,
            generation,
            started_at: now,
            progress: Mutex::new(Progress {
                status,
                attempts: 0,
                finished_at: status.is_finished().then_some(now),
            }),
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
        }
    }

    fn with_progress<R>(&self, f: impl FnOnce(&mut Progress) -> R) -> R {
        let mut guard = self
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub(crate) fn status(&self) -> MonitorStatus {
        self.with_progress(|p| p.status)
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.status().is_finished()
    }

    pub(crate) fn set_checking(&self) {
        self.with_progress(|p| {
            if !p.status.is_finished() {
                p.status = MonitorStatus::Checking;
            }
        });
    }

    /// Count one completed attempt; returns the new total, or `None` once
    /// the session has already finished.
    pub(crate) fn record_attempt(&self) -> Option<u32> {
        self.with_progress(|p| {
            if p.status.is_finished() {
                return None;
            }
            p.attempts += 1;
            Some(p.attempts)
        })
    }

    /// Settle the final status. The first terminal status wins.
    pub(crate) fn finish(&self, status: MonitorStatus) -> bool {
        self.with_progress(|p| {
            if p.status.is_finished() {
                return false;
            }
            p.status = status;
            p.finished_at = Some(Instant::now());
            true
        })
    }

    /// Mark the session cancelled right away and wake its loop. A probe
    /// still in flight finishes, but its result is dropped.
    pub(crate) fn request_cancel(&self) -> bool {
        self.cancel_requested.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is not waiting right now
        self.cancel_notify.notify_one();
        self.finish(MonitorStatus::Cancelled)
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Sleep for `period`, returning early if a cancel is requested.
    pub(crate) async fn pause(&self, period: Duration) {
        if period.is_zero() || self.cancel_requested() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = self.cancel_notify.notified() => {}
        }
    }

    pub(crate) fn snapshot(&self) -> MonitorSnapshot {
        let (status, attempts, finished_at) =
            self.with_progress(|p| (p.status, p.attempts, p.finished_at));
        let end = finished_at.unwrap_or_else(Instant::now);
        let elapsed = end.saturating_duration_since(self.started_at).as_secs_f64();
        MonitorSnapshot {
            machine_id: self.machine_id,
            machine_name: self.machine_name.clone(),
            ip_address: self.ip_address.clone(),
            status,
            attempts,
            max_attempts: self.max_attempts,
            elapsed: (elapsed * 10.0).round() / 10.0,
            finished: status.is_finished(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_set() {
        assert!(!MonitorStatus::Pending.is_finished());
        assert!(!MonitorStatus::Checking.is_finished());
        for s in [
            MonitorStatus::Online,
            MonitorStatus::Timeout,
            MonitorStatus::Cancelled,
            MonitorStatus::NoIp,
        ] {
            assert!(s.is_finished());
        }
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(serde_json::to_string(&MonitorStatus::NoIp).unwrap(), "\"no_ip\"");
        assert_eq!(serde_json::to_string(&MonitorStatus::Checking).unwrap(), "\"checking\"");
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_elapsed_freezes_when_finished() {
        let slot = MonitorSlot::new(1, "nas", "10.0.0.5", 3, 1, MonitorStatus::Pending);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        slot.finish(MonitorStatus::Online);
        tokio::time::sleep(Duration::from_secs(10)).await;

        let snap = slot.snapshot();
        assert_eq!(snap.elapsed, 2.5);
        assert!(snap.finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_returns_early_on_cancel() {
        let slot = std::sync::Arc::new(MonitorSlot::new(1, "nas", "10.0.0.5", 3, 1, MonitorStatus::Checking));
        let waiter = {
            let slot = slot.clone();
            tokio::spawn(async move {
                let start = Instant::now();
                slot.pause(Duration::from_secs(60)).await;
                start.elapsed()
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        slot.request_cancel();
        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_finishes_immediately() {
        let slot = MonitorSlot::new(1, "nas", "10.0.0.5", 3, 1, MonitorStatus::Checking);
        assert!(slot.request_cancel());

        let snap = slot.snapshot();
        assert_eq!(snap.status, MonitorStatus::Cancelled);
        assert!(snap.finished);

        // late results from the loop cannot overwrite the cancel
        assert_eq!(slot.record_attempt(), None);
        assert!(!slot.finish(MonitorStatus::Online));
        slot.set_checking();
        assert_eq!(slot.status(), MonitorStatus::Cancelled);
        assert!(!slot.request_cancel());
    }
}
