//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::traits::{HistoryRecorder, MachineDirectory, TaskStore};
use lanwake_core::types::{
    Group, HistoryEntry, Machine, NewHistoryEntry, ScheduledTask,
};
use lanwake_wol::{Reachability, WakeSender, WakeSignal};
use std::sync::Mutex;

pub fn machine(id: i64, name: &str, group_id: Option<i64>) -> Machine {
    Machine {
        id,
        name: name.into(),
        mac_address: format!("AA:BB:CC:DD:EE:{id:02X}"),
        ip_address: Some(format!("10.0.0.{id}")),
        broadcast_address: "255.255.255.255".into(),
        port: 9,
        group_id,
        group_name: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn group(id: i64, name: &str) -> Group {
    Group {
        id,
        name: name.into(),
        description: String::new(),
        machine_count: 0,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[derive(Default)]
pub struct StubDirectory {
    machines: Vec<Machine>,
    groups: Vec<Group>,
}

impl StubDirectory {
    pub fn with_machine(mut self, machine: Machine) -> Self {
        self.machines.push(machine);
        self
    }

    pub fn with_group(mut self, group: Group) -> Self {
        self.groups.push(group);
        self
    }
}

impl MachineDirectory for StubDirectory {
    fn get_machine(&self, id: i64) -> Result<Option<Machine>> {
        Ok(self.machines.iter().find(|m| m.id == id).cloned())
    }

    fn get_group(&self, id: i64) -> Result<Option<Group>> {
        Ok(self.groups.iter().find(|g| g.id == id).cloned())
    }

    fn machines_in_group(&self, group_id: i64) -> Result<Vec<Machine>> {
        Ok(self
            .machines
            .iter()
            .filter(|m| m.group_id == Some(group_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct StubHistory {
    pub entries: Mutex<Vec<NewHistoryEntry>>,
}

impl StubHistory {
    pub fn entries(&self) -> Vec<NewHistoryEntry> {
        self.entries.lock().unwrap().clone()
    }
}

impl HistoryRecorder for StubHistory {
    fn record_wake(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry> {
        let mut entries = self.entries.lock().unwrap();
        entries.push(entry.clone());
        Ok(HistoryEntry {
            id: entries.len() as i64,
            machine_id: entry.machine_id,
            machine_name: entry.machine_name.clone(),
            mac_address: entry.mac_address.clone(),
            status: entry.status,
            message: entry.message.clone(),
            created_at: Utc::now(),
        })
    }
}

/// Records every signal; fails for MACs listed in `failing`.
#[derive(Default)]
pub struct StubSender {
    pub sent: Mutex<Vec<WakeSignal>>,
    pub failing: Vec<String>,
}

impl StubSender {
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl WakeSender for StubSender {
    async fn send(&self, signal: &WakeSignal) -> Result<()> {
        if self.failing.contains(&signal.mac.to_string()) {
            return Err(LanWakeError::SignalSend("network unreachable".into()));
        }
        self.sent.lock().unwrap().push(*signal);
        Ok(())
    }
}

pub struct NeverUp;

#[async_trait]
impl Reachability for NeverUp {
    async fn probe(&self, _ip: &str) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Default)]
pub struct StubTasks {
    pub tasks: Mutex<Vec<ScheduledTask>>,
}

impl StubTasks {
    pub fn with(tasks: Vec<ScheduledTask>) -> Self {
        Self { tasks: Mutex::new(tasks) }
    }

    pub fn get(&self, id: i64) -> Option<ScheduledTask> {
        self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }
}

impl TaskStore for StubTasks {
    fn enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.enabled)
            .cloned()
            .collect())
    }

    fn mark_fired(&self, id: i64, fired_at: DateTime<Utc>, disable: bool) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| LanWakeError::task_not_found(id))?;
        task.last_fired = Some(fired_at);
        if disable {
            task.enabled = false;
        }
        Ok(())
    }
}
