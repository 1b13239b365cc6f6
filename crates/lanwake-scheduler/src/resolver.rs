//! Expands a task target into the machines it covers at fire time.

use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::traits::MachineDirectory;
use lanwake_core::types::{Group, Machine, TargetType, TaskTarget};
use std::sync::Arc;

#[derive(Clone)]
pub struct TaskTargetResolver {
    directory: Arc<dyn MachineDirectory>,
}

impl TaskTargetResolver {
    pub fn new(directory: Arc<dyn MachineDirectory>) -> Self {
        Self { directory }
    }

    /// Machine ids the target covers right now.
    ///
    /// A machine target is returned as-is; whether it still exists is the
    /// waker's concern. A group target lists its current members.
    pub fn resolve(&self, target: &TaskTarget) -> Result<Vec<i64>> {
        match target.target_type {
            TargetType::Machine => Ok(vec![target.target_id]),
            TargetType::Group => Ok(self
                .group_members(target.target_id)?
                .1
                .iter()
                .map(|m| m.id)
                .collect()),
        }
    }

    /// The group and its members, ordered by name then id.
    pub fn group_members(&self, group_id: i64) -> Result<(Group, Vec<Machine>)> {
        let group = self
            .directory
            .get_group(group_id)?
            .ok_or_else(|| LanWakeError::group_not_found(group_id))?;
        let mut members = self.directory.machines_in_group(group_id)?;
        members.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok((group, members))
    }
}
