//! Scheduled task persistence, including the last-fired marker.

use chrono::{DateTime, Utc};
use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::traits::TaskStore;
use lanwake_core::types::{NewScheduledTask, Schedule, ScheduledTask, TargetType, TaskTarget};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::db::{WakeDb, db_err, now_str, parse_opt_ts, parse_ts};

const TASK_COLUMNS: &str = "id, name, cron_expression, scheduled_time, target_type, target_id, \
     enabled, last_fired, created_at, updated_at";

/// Decode a row; a row violating the cron/once invariant surfaces as an error.
fn task_from_row(row: &Row<'_>) -> rusqlite::Result<std::result::Result<ScheduledTask, String>> {
    let id: i64 = row.get(0)?;
    let cron: String = row.get(2)?;
    let scheduled: String = row.get(3)?;
    let target_type: String = row.get(4)?;

    let schedule = match (cron.trim().is_empty(), scheduled.trim().is_empty()) {
        (false, true) => Schedule::Cron(cron.trim().to_string()),
        (true, false) => match DateTime::parse_from_rfc3339(scheduled.trim()) {
            Ok(at) => Schedule::Once(at.with_timezone(&Utc)),
            Err(e) => return Ok(Err(format!("task {id}: bad scheduled_time '{scheduled}': {e}"))),
        },
        _ => return Ok(Err(format!("task {id}: needs exactly one of cron_expression / scheduled_time"))),
    };
    let target_type = match target_type.parse::<TargetType>() {
        Ok(t) => t,
        Err(e) => return Ok(Err(format!("task {id}: {e}"))),
    };

    Ok(Ok(ScheduledTask {
        id,
        name: row.get(1)?,
        enabled: row.get::<_, i32>(6)? != 0,
        target: TaskTarget { target_type, target_id: row.get(5)? },
        schedule,
        last_fired: parse_opt_ts(row.get(7)?),
        created_at: parse_ts(&row.get::<_, String>(8)?),
        updated_at: parse_ts(&row.get::<_, String>(9)?),
    }))
}

fn schedule_columns(schedule: &Schedule) -> (String, String) {
    match schedule {
        Schedule::Cron(expr) => (expr.clone(), String::new()),
        Schedule::Once(at) => (String::new(), at.to_rfc3339()),
    }
}

fn load_tasks(conn: &Connection, where_clause: &str) -> Result<Vec<ScheduledTask>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM scheduled_tasks {where_clause} ORDER BY id"
        ))
        .map_err(|e| db_err("Load tasks", e))?;
    let rows = stmt
        .query_map([], task_from_row)
        .map_err(|e| db_err("Load tasks", e))?;

    let mut tasks = Vec::new();
    for row in rows {
        match row.map_err(|e| db_err("Load tasks", e))? {
            Ok(task) => tasks.push(task),
            Err(reason) => tracing::warn!("⚠️ Skipping malformed scheduled task: {reason}"),
        }
    }
    Ok(tasks)
}

fn query_task(conn: &Connection, id: i64) -> Result<Option<ScheduledTask>> {
    let row = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM scheduled_tasks WHERE id = ?1"),
            [id],
            task_from_row,
        )
        .optional()
        .map_err(|e| db_err("Get task", e))?;
    match row {
        Some(Ok(task)) => Ok(Some(task)),
        Some(Err(reason)) => Err(LanWakeError::Database(reason)),
        None => Ok(None),
    }
}

impl WakeDb {
    /// All tasks, oldest first.
    pub fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        load_tasks(&*self.conn()?, "")
    }

    pub fn get_task(&self, id: i64) -> Result<Option<ScheduledTask>> {
        query_task(&*self.conn()?, id)
    }

    pub fn create_task(&self, task: &NewScheduledTask) -> Result<ScheduledTask> {
        let conn = self.conn()?;
        let (cron, scheduled) = schedule_columns(&task.schedule);
        let now = now_str();
        conn.execute(
            "INSERT INTO scheduled_tasks
             (name, cron_expression, scheduled_time, target_type, target_id, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                task.name,
                cron,
                scheduled,
                task.target.target_type.as_str(),
                task.target.target_id,
                task.enabled as i32,
                now,
            ],
        )
        .map_err(|e| db_err("Create task", e))?;
        let id = conn.last_insert_rowid();
        tracing::info!("📅 Task added: '{}' ({}) id={}", task.name, task.target, id);
        query_task(&conn, id)?.ok_or_else(|| LanWakeError::task_not_found(id))
    }

    /// Replace a task's definition. Changing the schedule resets the
    /// last-fired marker.
    pub fn update_task(&self, id: i64, task: &NewScheduledTask) -> Result<ScheduledTask> {
        let conn = self.conn()?;
        let current = query_task(&conn, id)?.ok_or_else(|| LanWakeError::task_not_found(id))?;
        let last_fired = if current.schedule == task.schedule {
            current.last_fired.map(|t| t.to_rfc3339())
        } else {
            None
        };
        let (cron, scheduled) = schedule_columns(&task.schedule);
        conn.execute(
            "UPDATE scheduled_tasks SET name = ?1, cron_expression = ?2, scheduled_time = ?3,
                 target_type = ?4, target_id = ?5, enabled = ?6, last_fired = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                task.name,
                cron,
                scheduled,
                task.target.target_type.as_str(),
                task.target.target_id,
                task.enabled as i32,
                last_fired,
                now_str(),
                id,
            ],
        )
        .map_err(|e| db_err("Update task", e))?;
        query_task(&conn, id)?.ok_or_else(|| LanWakeError::task_not_found(id))
    }

    pub fn delete_task(&self, id: i64) -> Result<()> {
        let changed = self
            .conn()?
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", [id])
            .map_err(|e| db_err("Delete task", e))?;
        if changed == 0 {
            return Err(LanWakeError::task_not_found(id));
        }
        Ok(())
    }

    /// Display name of a task target, if it still exists.
    pub fn target_name(&self, target: &TaskTarget) -> Result<Option<String>> {
        let table = match target.target_type {
            TargetType::Machine => "machines",
            TargetType::Group => "groups",
        };
        self.conn()?
            .query_row(
                &format!("SELECT name FROM {table} WHERE id = ?1"),
                [target.target_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| db_err("Resolve target name", e))
    }

    pub fn enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        load_tasks(&*self.conn()?, "WHERE enabled = 1")
    }

    pub fn mark_fired(&self, id: i64, fired_at: DateTime<Utc>, disable: bool) -> Result<()> {
        let sql = if disable {
            "UPDATE scheduled_tasks SET last_fired = ?1, enabled = 0, updated_at = ?2 WHERE id = ?3"
        } else {
            "UPDATE scheduled_tasks SET last_fired = ?1, updated_at = ?2 WHERE id = ?3"
        };
        let changed = self
            .conn()?
            .execute(sql, params![fired_at.to_rfc3339(), now_str(), id])
            .map_err(|e| db_err("Mark task fired", e))?;
        if changed == 0 {
            return Err(LanWakeError::task_not_found(id));
        }
        Ok(())
    }
}

impl TaskStore for WakeDb {
    fn enabled_tasks(&self) -> Result<Vec<ScheduledTask>> {
        WakeDb::enabled_tasks(self)
    }

    fn mark_fired(&self, id: i64, fired_at: DateTime<Utc>, disable: bool) -> Result<()> {
        WakeDb::mark_fired(self, id, fired_at, disable)
    }
}
