//! WakeAction: the single funnel for manual and scheduled wakes.
//!
//! Per machine: build the magic packet, send it, record the outcome in
//! history, and on a clean send hand the machine to the monitor registry.

use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::traits::{HistoryRecorder, MachineDirectory};
use lanwake_core::types::{HistoryStatus, Machine, NewHistoryEntry, TargetType, TaskTarget};
use lanwake_monitor::{MonitorRegistry, MonitorSnapshot};
use lanwake_wol::{WakeSender, WakeSignal};
use serde::Serialize;
use std::sync::Arc;

use crate::resolver::TaskTargetResolver;

/// Who asked for the wake. Shows up in history messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeSource {
    Manual,
    Group { name: String },
    Batch,
    Scheduled { task_name: String },
}

impl WakeSource {
    pub fn scheduled(task_name: &str) -> Self {
        WakeSource::Scheduled { task_name: task_name.to_string() }
    }

    fn label(&self) -> Option<String> {
        match self {
            WakeSource::Manual => None,
            WakeSource::Group { name } => Some(format!("Group wake: {name}")),
            WakeSource::Batch => Some("Batch wake".into()),
            WakeSource::Scheduled { task_name } => Some(format!("Scheduled task: {task_name}")),
        }
    }

    fn success_message(&self, machine: &Machine) -> String {
        self.label().unwrap_or_else(|| {
            format!("Magic packet sent to {} ({})", machine.name, machine.mac_address)
        })
    }

    fn failure_message(&self, error: &LanWakeError) -> String {
        match self.label() {
            Some(label) => format!("{label} - {error}"),
            None => error.to_string(),
        }
    }
}

/// Per-machine result of a wake.
#[derive(Debug, Clone, Serialize)]
pub struct WakeOutcome {
    pub machine_id: i64,
    pub machine: String,
    pub status: HistoryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitor: Option<MonitorSnapshot>,
}

impl WakeOutcome {
    pub fn is_success(&self) -> bool {
        self.status == HistoryStatus::Success
    }
}

/// Result of waking a target or a batch.
#[derive(Debug, Clone, Serialize)]
pub struct WakeReport {
    pub message: String,
    pub results: Vec<WakeOutcome>,
}

impl WakeReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

pub struct WakeAction {
    directory: Arc<dyn MachineDirectory>,
    history: Arc<dyn HistoryRecorder>,
    sender: Arc<dyn WakeSender>,
    monitors: Arc<MonitorRegistry>,
    resolver: TaskTargetResolver,
}

impl WakeAction {
    pub fn new(
        directory: Arc<dyn MachineDirectory>,
        history: Arc<dyn HistoryRecorder>,
        sender: Arc<dyn WakeSender>,
        monitors: Arc<MonitorRegistry>,
    ) -> Self {
        Self {
            resolver: TaskTargetResolver::new(directory.clone()),
            directory,
            history,
            sender,
            monitors,
        }
    }

    pub fn monitors(&self) -> &Arc<MonitorRegistry> {
        &self.monitors
    }

    pub fn resolver(&self) -> &TaskTargetResolver {
        &self.resolver
    }

    /// Wake whatever the target points at.
    pub async fn wake(&self, target: &TaskTarget, source: &WakeSource) -> Result<WakeReport> {
        match target.target_type {
            TargetType::Machine => {
                let outcome = self.wake_machine(target.target_id, source).await?;
                Ok(WakeReport {
                    message: format!("Wake signal sent to {}", outcome.machine),
                    results: vec![outcome],
                })
            }
            TargetType::Group => self.wake_group(target.target_id, source).await,
        }
    }

    /// Wake one machine. A send failure is recorded in history, then returned.
    pub async fn wake_machine(&self, machine_id: i64, source: &WakeSource) -> Result<WakeOutcome> {
        let machine = self
            .directory
            .get_machine(machine_id)?
            .ok_or_else(|| LanWakeError::machine_not_found(machine_id))?;
        let monitor = self.send_and_record(&machine, source).await?;
        Ok(WakeOutcome {
            machine_id: machine.id,
            machine: machine.name,
            status: HistoryStatus::Success,
            error: None,
            monitor: Some(monitor),
        })
    }

    /// Wake every member independently. An empty group is a no-op.
    pub async fn wake_group(&self, group_id: i64, source: &WakeSource) -> Result<WakeReport> {
        let (group, members) = self.resolver.group_members(group_id)?;
        let source = match source {
            WakeSource::Manual => WakeSource::Group { name: group.name.clone() },
            other => other.clone(),
        };

        let mut results = Vec::with_capacity(members.len());
        for machine in &members {
            results.push(self.wake_member(machine, &source).await);
        }
        let report = WakeReport {
            message: format!("Wake signal sent to group '{}'", group.name),
            results,
        };
        tracing::info!(
            "📣 Group '{}': {} woken, {} failed",
            group.name,
            report.succeeded(),
            report.failed()
        );
        Ok(report)
    }

    /// Wake an explicit list of machines. Unknown ids are skipped.
    pub async fn wake_batch(&self, machine_ids: &[i64]) -> Result<WakeReport> {
        let Some(&first) = machine_ids.first() else {
            return Err(LanWakeError::validation("No machines specified"));
        };

        let mut machines = Vec::with_capacity(machine_ids.len());
        for id in machine_ids {
            match self.directory.get_machine(*id)? {
                Some(machine) => machines.push(machine),
                None => tracing::debug!("Batch wake: machine {id} not found, skipping"),
            }
        }
        if machines.is_empty() {
            return Err(LanWakeError::machine_not_found(first));
        }

        let mut results = Vec::with_capacity(machines.len());
        for machine in &machines {
            results.push(self.wake_member(machine, &WakeSource::Batch).await);
        }
        Ok(WakeReport {
            message: "Batch wake complete".into(),
            results,
        })
    }

    async fn wake_member(&self, machine: &Machine, source: &WakeSource) -> WakeOutcome {
        match self.send_and_record(machine, source).await {
            Ok(monitor) => WakeOutcome {
                machine_id: machine.id,
                machine: machine.name.clone(),
                status: HistoryStatus::Success,
                error: None,
                monitor: Some(monitor),
            },
            Err(e) => WakeOutcome {
                machine_id: machine.id,
                machine: machine.name.clone(),
                status: HistoryStatus::Failed,
                error: Some(e.to_string()),
                monitor: None,
            },
        }
    }

    async fn send_and_record(&self, machine: &Machine, source: &WakeSource) -> Result<MonitorSnapshot> {
        let sent = match WakeSignal::for_machine(machine) {
            Ok(signal) => self.sender.send(&signal).await,
            Err(e) => Err(e),
        };

        match sent {
            Ok(()) => {
                self.record(&NewHistoryEntry::success(machine, source.success_message(machine)));
                Ok(self.monitors.start_for(machine))
            }
            Err(e) => {
                tracing::warn!("⚠️ Wake of '{}' failed: {e}", machine.name);
                self.record(&NewHistoryEntry::failure(machine, source.failure_message(&e)));
                Err(e)
            }
        }
    }

    fn record(&self, entry: &NewHistoryEntry) {
        if let Err(e) = self.history.record_wake(entry) {
            tracing::warn!("⚠️ Failed to record wake history for '{}': {e}", entry.machine_name);
        }
    }
}
