//! Machine and group CRUD.

use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::traits::MachineDirectory;
use lanwake_core::types::{Group, GroupUpdate, Machine, MachineUpdate, NewGroup, NewMachine};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::db::{WakeDb, db_err, is_unique_violation, now_str, parse_ts};

const MACHINE_COLUMNS: &str = "m.id, m.name, m.mac_address, m.ip_address, m.broadcast_address, \
     m.port, m.group_id, g.name, m.created_at, m.updated_at";

const GROUP_COLUMNS: &str = "g.id, g.name, g.description, \
     (SELECT COUNT(*) FROM machines m WHERE m.group_id = g.id), g.created_at, g.updated_at";

fn machine_from_row(row: &Row<'_>) -> rusqlite::Result<Machine> {
    let ip: String = row.get(3)?;
    Ok(Machine {
        id: row.get(0)?,
        name: row.get(1)?,
        mac_address: row.get(2)?,
        ip_address: if ip.is_empty() { None } else { Some(ip) },
        broadcast_address: row.get(4)?,
        port: row.get(5)?,
        group_id: row.get(6)?,
        group_name: row.get(7)?,
        created_at: parse_ts(&row.get::<_, String>(8)?),
        updated_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        machine_count: row.get(3)?,
        created_at: parse_ts(&row.get::<_, String>(4)?),
        updated_at: parse_ts(&row.get::<_, String>(5)?),
    })
}

fn query_machine(conn: &Connection, id: i64) -> Result<Option<Machine>> {
    conn.query_row(
        &format!(
            "SELECT {MACHINE_COLUMNS} FROM machines m LEFT JOIN groups g ON m.group_id = g.id WHERE m.id = ?1"
        ),
        [id],
        machine_from_row,
    )
    .optional()
    .map_err(|e| db_err("Get machine", e))
}

fn query_group(conn: &Connection, id: i64) -> Result<Option<Group>> {
    conn.query_row(
        &format!("SELECT {GROUP_COLUMNS} FROM groups g WHERE g.id = ?1"),
        [id],
        group_from_row,
    )
    .optional()
    .map_err(|e| db_err("Get group", e))
}

fn ensure_group_exists(conn: &Connection, group_id: Option<i64>) -> Result<()> {
    if let Some(gid) = group_id
        && query_group(conn, gid)?.is_none()
    {
        return Err(LanWakeError::group_not_found(gid));
    }
    Ok(())
}

impl WakeDb {
    // ─── Machines ────────────────────────────────────────────

    /// List machines ordered by name, optionally only one group's.
    pub fn list_machines(&self, group_id: Option<i64>) -> Result<Vec<Machine>> {
        let conn = self.conn()?;
        let mut sql = format!(
            "SELECT {MACHINE_COLUMNS} FROM machines m LEFT JOIN groups g ON m.group_id = g.id"
        );
        if group_id.is_some() {
            sql.push_str(" WHERE m.group_id = ?1");
        }
        sql.push_str(" ORDER BY m.name, m.id");

        let mut stmt = conn.prepare(&sql).map_err(|e| db_err("List machines", e))?;
        let rows = match group_id {
            Some(gid) => stmt.query_map([gid], machine_from_row),
            None => stmt.query_map([], machine_from_row),
        }
        .map_err(|e| db_err("List machines", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("List machines", e))
    }

    pub fn get_machine(&self, id: i64) -> Result<Option<Machine>> {
        query_machine(&*self.conn()?, id)
    }

    /// Validate, normalise and insert a machine.
    pub fn create_machine(&self, machine: &NewMachine) -> Result<Machine> {
        let machine = machine.validated()?;
        let conn = self.conn()?;
        ensure_group_exists(&conn, machine.group_id)?;
        let now = now_str();
        conn.execute(
            "INSERT INTO machines (name, mac_address, ip_address, broadcast_address, port, group_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                machine.name,
                machine.mac_address,
                machine.ip_address.clone().unwrap_or_default(),
                machine.broadcast_address,
                machine.port,
                machine.group_id,
                now,
            ],
        )
        .map_err(|e| db_err("Create machine", e))?;
        let id = conn.last_insert_rowid();
        tracing::info!("🖥️ Machine added: '{}' ({}) id={}", machine.name, machine.mac_address, id);
        query_machine(&conn, id)?.ok_or_else(|| LanWakeError::machine_not_found(id))
    }

    pub fn update_machine(&self, id: i64, update: &MachineUpdate) -> Result<Machine> {
        let conn = self.conn()?;
        let current = query_machine(&conn, id)?.ok_or_else(|| LanWakeError::machine_not_found(id))?;
        let merged = update.apply(&current)?;
        ensure_group_exists(&conn, merged.group_id)?;
        conn.execute(
            "UPDATE machines SET name = ?1, mac_address = ?2, ip_address = ?3, broadcast_address = ?4,
                 port = ?5, group_id = ?6, updated_at = ?7 WHERE id = ?8",
            params![
                merged.name,
                merged.mac_address,
                merged.ip_address.unwrap_or_default(),
                merged.broadcast_address,
                merged.port,
                merged.group_id,
                now_str(),
                id,
            ],
        )
        .map_err(|e| db_err("Update machine", e))?;
        query_machine(&conn, id)?.ok_or_else(|| LanWakeError::machine_not_found(id))
    }

    /// Delete a machine. Scheduled tasks pointing at it are left alone and
    /// fail at fire time.
    pub fn delete_machine(&self, id: i64) -> Result<()> {
        let changed = self
            .conn()?
            .execute("DELETE FROM machines WHERE id = ?1", [id])
            .map_err(|e| db_err("Delete machine", e))?;
        if changed == 0 {
            return Err(LanWakeError::machine_not_found(id));
        }
        Ok(())
    }

    // ─── Groups ──────────────────────────────────────────────

    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {GROUP_COLUMNS} FROM groups g ORDER BY g.name"))
            .map_err(|e| db_err("List groups", e))?;
        let rows = stmt
            .query_map([], group_from_row)
            .map_err(|e| db_err("List groups", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("List groups", e))
    }

    pub fn get_group(&self, id: i64) -> Result<Option<Group>> {
        query_group(&*self.conn()?, id)
    }

    pub fn create_group(&self, group: &NewGroup) -> Result<Group> {
        let group = group.validated()?;
        let conn = self.conn()?;
        let now = now_str();
        conn.execute(
            "INSERT INTO groups (name, description, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![group.name, group.description, now],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                LanWakeError::validation(format!("Group name '{}' already exists", group.name))
            } else {
                db_err("Create group", e)
            }
        })?;
        let id = conn.last_insert_rowid();
        query_group(&conn, id)?.ok_or_else(|| LanWakeError::group_not_found(id))
    }

    pub fn update_group(&self, id: i64, update: &GroupUpdate) -> Result<Group> {
        let conn = self.conn()?;
        let current = query_group(&conn, id)?.ok_or_else(|| LanWakeError::group_not_found(id))?;
        let merged = update.apply(&current)?;
        conn.execute(
            "UPDATE groups SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
            params![merged.name, merged.description, now_str(), id],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                LanWakeError::validation(format!("Group name '{}' already exists", merged.name))
            } else {
                db_err("Update group", e)
            }
        })?;
        query_group(&conn, id)?.ok_or_else(|| LanWakeError::group_not_found(id))
    }

    /// Delete a group. Members are unassigned, never deleted.
    pub fn delete_group(&self, id: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(|e| db_err("Delete group", e))?;
        tx.execute("UPDATE machines SET group_id = NULL WHERE group_id = ?1", [id])
            .map_err(|e| db_err("Unassign group members", e))?;
        let changed = tx
            .execute("DELETE FROM groups WHERE id = ?1", [id])
            .map_err(|e| db_err("Delete group", e))?;
        if changed == 0 {
            return Err(LanWakeError::group_not_found(id));
        }
        tx.commit().map_err(|e| db_err("Delete group", e))?;
        Ok(())
    }

    /// Members of a group ordered by name then id.
    pub fn machines_in_group(&self, group_id: i64) -> Result<Vec<Machine>> {
        self.list_machines(Some(group_id))
    }
}

impl MachineDirectory for WakeDb {
    fn get_machine(&self, id: i64) -> Result<Option<Machine>> {
        WakeDb::get_machine(self, id)
    }

    fn get_group(&self, id: i64) -> Result<Option<Group>> {
        WakeDb::get_group(self, id)
    }

    fn machines_in_group(&self, group_id: i64) -> Result<Vec<Machine>> {
        WakeDb::machines_in_group(self, group_id)
    }
}
