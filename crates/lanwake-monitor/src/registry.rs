//! Monitor registry and the per-machine probe loop.

use lanwake_core::config::MonitorConfig;
use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::traits::MachineDirectory;
use lanwake_core::types::Machine;
use lanwake_wol::Reachability;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::state::{MonitorSlot, MonitorSnapshot, MonitorStatus};

/// Timing and budget for one probe session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorPolicy {
    /// Wait before the first probe; machines need a moment to boot.
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
    /// How long a finished session stays visible to pollers.
    pub display_period: Duration,
}

impl Default for MonitorPolicy {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for MonitorPolicy {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            interval: config.interval(),
            max_attempts: config.max_attempts.max(1),
            display_period: config.display_period(),
        }
    }
}

/// Process-wide map of machine id → probe session.
///
/// Cheap to share behind an `Arc`; every method is safe to call from any
/// task. Starting a session spawns onto the current tokio runtime.
pub struct MonitorRegistry {
    monitors: Mutex<HashMap<i64, Arc<MonitorSlot>>>,
    directory: Arc<dyn MachineDirectory>,
    probe: Arc<dyn Reachability>,
    policy: MonitorPolicy,
    generation: AtomicU64,
}

impl MonitorRegistry {
    pub fn new(
        directory: Arc<dyn MachineDirectory>,
        probe: Arc<dyn Reachability>,
        policy: MonitorPolicy,
    ) -> Self {
        Self {
            monitors: Mutex::new(HashMap::new()),
            directory,
            probe,
            policy,
            generation: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> MonitorPolicy {
        self.policy
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<i64, Arc<MonitorSlot>>> {
        self.monitors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look the machine up and start verifying it.
    pub fn start_monitor(self: &Arc<Self>, machine_id: i64) -> Result<MonitorSnapshot> {
        let machine = self
            .directory
            .get_machine(machine_id)?
            .ok_or_else(|| LanWakeError::machine_not_found(machine_id))?;
        Ok(self.start_for(&machine))
    }

    /// Start verifying an already-loaded machine.
    ///
    /// No-op while a session for this id is unfinished; the existing
    /// session's snapshot is returned. A finished session still on display
    /// is replaced by a fresh one.
    pub fn start_for(self: &Arc<Self>, machine: &Machine) -> MonitorSnapshot {
        let mut slots = self.slots();
        if let Some(existing) = slots.get(&machine.id)
            && !existing.is_finished()
        {
            tracing::debug!("Monitor for '{}' already running", machine.name);
            return existing.snapshot();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ip = machine.probe_ip();
        let slot = Arc::new(MonitorSlot::new(
            machine.id,
            &machine.name,
            ip.unwrap_or_default(),
            self.policy.max_attempts,
            generation,
            if ip.is_some() { MonitorStatus::Pending } else { MonitorStatus::NoIp },
        ));
        slots.insert(machine.id, slot.clone());
        drop(slots);

        match ip {
            Some(ip) => {
                tracing::info!(
                    "🔍 Monitoring '{}' ({ip}): up to {} probes every {:?}",
                    machine.name,
                    self.policy.max_attempts,
                    self.policy.interval
                );
                tokio::spawn(self.clone().run(slot.clone()));
            }
            None => {
                tracing::debug!("'{}' has no IP, skipping verification", machine.name);
                self.schedule_eviction(machine.id, generation);
            }
        }
        slot.snapshot()
    }

    pub fn get_monitor(&self, machine_id: i64) -> Option<MonitorSnapshot> {
        self.slots().get(&machine_id).map(|slot| slot.snapshot())
    }

    /// Every session currently visible, ordered by machine id.
    pub fn list_monitors(&self) -> Vec<MonitorSnapshot> {
        let mut all: Vec<_> = self.slots().values().map(|s| s.snapshot()).collect();
        all.sort_by_key(|s| s.machine_id);
        all
    }

    /// Ask an unfinished session to stop. Returns `false` when there is
    /// nothing to cancel.
    pub fn cancel_monitor(&self, machine_id: i64) -> bool {
        match self.slots().get(&machine_id) {
            Some(slot) if slot.request_cancel() => {
                tracing::info!("🛑 Monitor for '{}' cancelled", slot.machine_name);
                true
            }
            _ => false,
        }
    }

    /// Remove a finished session before its display period runs out.
    pub fn dismiss_monitor(&self, machine_id: i64) -> bool {
        let mut slots = self.slots();
        match slots.get(&machine_id) {
            Some(slot) if slot.is_finished() => {
                slots.remove(&machine_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel every session and forget them all.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.slots().drain().map(|(_, slot)| slot).collect();
        let active = drained.iter().filter(|slot| slot.request_cancel()).count();
        if active > 0 {
            tracing::info!("🛑 Stopped {active} active monitor(s)");
        }
    }

    // ─── Probe loop ─────────────────────────────────────────

    async fn run(self: Arc<Self>, slot: Arc<MonitorSlot>) {
        let outcome = self.probe_until_done(&slot).await;
        slot.finish(outcome);

        let snap = slot.snapshot();
        match snap.status {
            MonitorStatus::Online => tracing::info!(
                "✅ '{}' is online after {} attempt(s), {:.1}s",
                snap.machine_name,
                snap.attempts,
                snap.elapsed
            ),
            MonitorStatus::Timeout => tracing::warn!(
                "⏱️ '{}' did not answer after {} attempts",
                snap.machine_name,
                snap.attempts
            ),
            other => tracing::debug!("Monitor for '{}' ended: {other:?}", snap.machine_name),
        }

        self.schedule_eviction(slot.machine_id, slot.generation);
    }

    async fn probe_until_done(&self, slot: &MonitorSlot) -> MonitorStatus {
        slot.pause(self.policy.initial_delay).await;
        loop {
            if slot.cancel_requested() {
                return MonitorStatus::Cancelled;
            }
            slot.set_checking();

            let reachable = match self.check_once(&slot.ip_address).await {
                Ok(up) => up,
                Err(e) => {
                    tracing::debug!("{e}");
                    false
                }
            };
            // Result of a probe that straddles a cancel is dropped
            if slot.cancel_requested() {
                return MonitorStatus::Cancelled;
            }
            let Some(attempts) = slot.record_attempt() else {
                return MonitorStatus::Cancelled;
            };
            if reachable {
                return MonitorStatus::Online;
            }
            if attempts >= slot.max_attempts {
                return MonitorStatus::Timeout;
            }
            slot.pause(self.policy.interval).await;
        }
    }

    /// One reachability check. Any failure is a transient probe error.
    async fn check_once(&self, ip: &str) -> Result<bool> {
        self.probe
            .probe(ip)
            .await
            .map_err(|e| LanWakeError::Probe(format!("{ip}: {e}")))
    }

    fn schedule_eviction(self: &Arc<Self>, machine_id: i64, generation: u64) {
        let registry: Weak<Self> = Arc::downgrade(self);
        let period = self.policy.display_period;
        tokio::spawn(async move {
            tokio::time::sleep(period).await;
            if let Some(registry) = registry.upgrade() {
                registry.evict(machine_id, generation);
            }
        });
    }

    fn evict(&self, machine_id: i64, generation: u64) {
        let mut slots = self.slots();
        if slots
            .get(&machine_id)
            .is_some_and(|slot| slot.generation == generation)
        {
            slots.remove(&machine_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use lanwake_core::types::Group;
    use std::sync::atomic::AtomicU32;

    struct Directory(Vec<Machine>);

    impl MachineDirectory for Directory {
        fn get_machine(&self, id: i64) -> Result<Option<Machine>> {
            Ok(self.0.iter().find(|m| m.id == id).cloned())
        }
        fn get_group(&self, _id: i64) -> Result<Option<Group>> {
            Ok(None)
        }
        fn machines_in_group(&self, _group_id: i64) -> Result<Vec<Machine>> {
            Ok(vec![])
        }
    }

    /// Answers on the `online_at`-th call (1-based), never if `None`.
    /// Each call takes `latency`; `Err` when `broken`.
    struct ScriptedProbe {
        calls: AtomicU32,
        online_at: Option<u32>,
        latency: Duration,
        broken: bool,
    }

    impl ScriptedProbe {
        fn new(online_at: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                online_at,
                latency: Duration::ZERO,
                broken: false,
            })
        }
        fn slow(latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                online_at: None,
                latency,
                broken: false,
            })
        }
        fn broken() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                online_at: None,
                latency: Duration::ZERO,
                broken: true,
            })
        }
        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Reachability for ScriptedProbe {
        async fn probe(&self, ip: &str) -> Result<bool> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.broken {
                return Err(LanWakeError::validation(format!("Invalid IP address: '{ip}'")));
            }
            Ok(self.online_at.is_some_and(|at| n >= at))
        }
    }

    fn machine(id: i64, ip: Option<&str>) -> Machine {
        Machine {
            id,
            name: format!("pc-{id}"),
            mac_address: "AA:BB:CC:DD:EE:01".into(),
            ip_address: ip.map(String::from),
            broadcast_address: "255.255.255.255".into(),
            port: 9,
            group_id: None,
            group_name: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn policy(max_attempts: u32) -> MonitorPolicy {
        MonitorPolicy {
            initial_delay: Duration::from_secs(5),
            interval: Duration::from_secs(5),
            max_attempts,
            display_period: Duration::from_secs(300),
        }
    }

    fn registry(probe: Arc<ScriptedProbe>, policy: MonitorPolicy) -> Arc<MonitorRegistry> {
        let directory = Directory(vec![machine(1, Some("10.0.0.5")), machine(2, None)]);
        Arc::new(MonitorRegistry::new(Arc::new(directory), probe, policy))
    }

    async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ip_finishes_immediately() {
        let probe = ScriptedProbe::new(None);
        let reg = registry(probe.clone(), policy(3));

        let snap = reg.start_monitor(2).unwrap();
        assert_eq!(snap.status, MonitorStatus::NoIp);
        assert!(snap.finished);
        assert_eq!(snap.attempts, 0);
        assert_eq!(snap.ip_address, "");

        advance(30).await;
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_machine_is_not_found() {
        let reg = registry(ScriptedProbe::new(None), policy(3));
        assert!(reg.start_monitor(42).unwrap_err().is_not_found());
        assert!(reg.get_monitor(42).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_times_out_after_budget() {
        let probe = ScriptedProbe::new(None);
        let reg = registry(probe.clone(), policy(3));

        let snap = reg.start_monitor(1).unwrap();
        assert_eq!(snap.status, MonitorStatus::Pending);
        assert_eq!(snap.max_attempts, 3);

        // probes land at 5s, 10s, 15s
        advance(12).await;
        let mid = reg.get_monitor(1).unwrap();
        assert_eq!(mid.status, MonitorStatus::Checking);
        assert_eq!(mid.attempts, 2);
        assert!(!mid.finished);

        advance(4).await;
        let done = reg.get_monitor(1).unwrap();
        assert_eq!(done.status, MonitorStatus::Timeout);
        assert_eq!(done.attempts, 3);
        assert!(done.finished);
        assert!(done.elapsed >= 15.0 && done.elapsed < 16.0);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_on_second_probe() {
        let probe = ScriptedProbe::new(Some(2));
        let reg = registry(probe.clone(), policy(12));
        reg.start_monitor(1).unwrap();

        advance(20).await;
        let snap = reg.get_monitor(1).unwrap();
        assert_eq!(snap.status, MonitorStatus::Online);
        assert_eq!(snap.attempts, 2);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_between_attempts_freezes_count() {
        let probe = ScriptedProbe::new(None);
        let reg = registry(probe.clone(), policy(12));
        reg.start_monitor(1).unwrap();

        advance(7).await;
        assert!(reg.cancel_monitor(1));
        advance(1).await;

        let snap = reg.get_monitor(1).unwrap();
        assert_eq!(snap.status, MonitorStatus::Cancelled);
        assert_eq!(snap.attempts, 1);

        advance(60).await;
        assert_eq!(probe.calls(), 1);
        assert!(!reg.cancel_monitor(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_check_then_restart_gets_fresh_session() {
        let probe = ScriptedProbe::slow(Duration::from_secs(2));
        let reg = registry(probe.clone(), policy(12));
        reg.start_monitor(1).unwrap();

        // first probe runs from 5s to 7s
        advance(6).await;
        assert!(reg.cancel_monitor(1));
        assert_eq!(reg.get_monitor(1).unwrap().status, MonitorStatus::Cancelled);

        let fresh = reg.start_monitor(1).unwrap();
        assert_eq!(fresh.status, MonitorStatus::Pending);
        assert_eq!(fresh.attempts, 0);

        // new session probes at 11s..13s
        advance(8).await;
        let snap = reg.get_monitor(1).unwrap();
        assert_eq!(snap.status, MonitorStatus::Checking);
        assert_eq!(snap.attempts, 1);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_check_then_dismiss() {
        let reg = registry(ScriptedProbe::slow(Duration::from_secs(2)), policy(12));
        reg.start_monitor(1).unwrap();

        advance(6).await;
        assert!(reg.cancel_monitor(1));
        assert!(reg.dismiss_monitor(1));
        assert!(reg.get_monitor(1).is_none());

        // the old loop winding down must not bring it back
        advance(10).await;
        assert!(reg.list_monitors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_count_as_failed_attempts() {
        let probe = ScriptedProbe::broken();
        let reg = registry(probe.clone(), policy(2));

        let err = reg.check_once("10.0.0.5").await.unwrap_err();
        assert!(matches!(err, LanWakeError::Probe(_)));

        reg.start_monitor(1).unwrap();
        advance(11).await;
        let snap = reg.get_monitor(1).unwrap();
        assert_eq!(snap.status, MonitorStatus::Timeout);
        assert_eq!(snap.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_is_noop() {
        let probe = ScriptedProbe::new(None);
        let reg = registry(probe.clone(), policy(12));

        reg.start_monitor(1).unwrap();
        advance(6).await;
        let again = reg.start_monitor(1).unwrap();
        assert_eq!(again.attempts, 1);
        assert_eq!(reg.list_monitors().len(), 1);

        // only one loop is probing
        advance(5).await;
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_finish_gets_fresh_session() {
        let probe = ScriptedProbe::new(None);
        let reg = registry(probe.clone(), policy(1));

        reg.start_monitor(1).unwrap();
        advance(6).await;
        assert_eq!(reg.get_monitor(1).unwrap().status, MonitorStatus::Timeout);

        let fresh = reg.start_monitor(1).unwrap();
        assert_eq!(fresh.status, MonitorStatus::Pending);
        assert_eq!(fresh.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_eviction_keeps_newer_session() {
        let probe = ScriptedProbe::new(None);
        let reg = registry(probe, policy(1));

        // first session finishes at 5s, eviction due at 305s
        reg.start_monitor(1).unwrap();
        advance(200).await;
        // second session finishes at 205s, eviction due at 505s
        reg.start_monitor(1).unwrap();

        advance(110).await;
        let kept = reg.get_monitor(1).expect("newer session must survive");
        assert_eq!(kept.status, MonitorStatus::Timeout);

        advance(200).await;
        assert!(reg.get_monitor(1).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_session_evicted_after_display_period() {
        let reg = registry(ScriptedProbe::new(None), policy(3));
        reg.start_monitor(2).unwrap();

        advance(299).await;
        assert!(reg.get_monitor(2).is_some());
        advance(2).await;
        assert!(reg.get_monitor(2).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_only_finished() {
        let reg = registry(ScriptedProbe::new(None), policy(3));
        reg.start_monitor(1).unwrap();
        reg.start_monitor(2).unwrap();

        assert!(!reg.dismiss_monitor(1));
        assert!(reg.dismiss_monitor(2));
        assert!(reg.get_monitor(2).is_none());
        assert!(!reg.dismiss_monitor(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_loops() {
        let probe = ScriptedProbe::new(None);
        let reg = registry(probe.clone(), policy(12));
        reg.start_monitor(1).unwrap();
        advance(6).await;

        reg.shutdown();
        assert!(reg.list_monitors().is_empty());
        advance(60).await;
        assert_eq!(probe.calls(), 1);
    }

    #[test]
    fn test_policy_from_config() {
        let config = MonitorConfig::default();
        let p = MonitorPolicy::from(&config);
        assert_eq!(p.interval, Duration::from_secs(config.interval_secs));
        assert_eq!(p.max_attempts, config.max_attempts);
        assert_eq!(p.display_period, Duration::from_secs(300));
    }
}
