//! Persistent store traits: implemented by `lanwake-db`, stubbed in tests.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Group, HistoryEntry, Machine, NewHistoryEntry, ScheduledTask};

/// Read access to machines and groups.
pub trait MachineDirectory: Send + Sync {
    fn get_machine(&self, id: i64) -> Result<Option<Machine>>;

    fn get_group(&self, id: i64) -> Result<Option<Group>>;

    /// Machines currently assigned to `group_id`, in a stable order.
    fn machines_in_group(&self, group_id: i64) -> Result<Vec<Machine>>;
}

/// Append-only wake history sink.
pub trait HistoryRecorder: Send + Sync {
    fn record_wake(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry>;
}

/// What the scheduler loop needs from task storage.
pub trait TaskStore: Send + Sync {
    fn enabled_tasks(&self) -> Result<Vec<ScheduledTask>>;

    /// Persist the last-fired marker; `disable` also clears `enabled`.
    fn mark_fired(&self, id: i64, fired_at: DateTime<Utc>, disable: bool) -> Result<()>;
}
