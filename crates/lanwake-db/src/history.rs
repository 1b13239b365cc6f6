//! Wake history: append-only.

use lanwake_core::error::Result;
use lanwake_core::traits::HistoryRecorder;
use lanwake_core::types::{HistoryEntry, HistoryStatus, NewHistoryEntry};
use rusqlite::params;

use crate::db::{WakeDb, db_err, now_str, parse_ts};

impl WakeDb {
    /// Append one wake outcome.
    pub fn record_wake(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry> {
        let conn = self.conn()?;
        let now = now_str();
        conn.execute(
            "INSERT INTO wake_history (machine_id, machine_name, mac_address, status, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.machine_id,
                entry.machine_name,
                entry.mac_address,
                entry.status.as_str(),
                entry.message,
                now,
            ],
        )
        .map_err(|e| db_err("Record wake", e))?;
        Ok(HistoryEntry {
            id: conn.last_insert_rowid(),
            machine_id: entry.machine_id,
            machine_name: entry.machine_name.clone(),
            mac_address: entry.mac_address.clone(),
            status: entry.status,
            message: entry.message.clone(),
            created_at: parse_ts(&now),
        })
    }

    /// Most recent entries first.
    pub fn list_history(&self, limit: usize, offset: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, machine_id, machine_name, mac_address, status, message, created_at
                 FROM wake_history ORDER BY id DESC LIMIT ?1 OFFSET ?2",
            )
            .map_err(|e| db_err("List history", e))?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                let status: String = row.get(4)?;
                Ok(HistoryEntry {
                    id: row.get(0)?,
                    machine_id: row.get(1)?,
                    machine_name: row.get(2)?,
                    mac_address: row.get(3)?,
                    status: if status == "success" {
                        HistoryStatus::Success
                    } else {
                        HistoryStatus::Failed
                    },
                    message: row.get(5)?,
                    created_at: parse_ts(&row.get::<_, String>(6)?),
                })
            })
            .map_err(|e| db_err("List history", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| db_err("List history", e))
    }

    pub fn count_history(&self) -> Result<i64> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM wake_history", [], |r| r.get(0))
            .map_err(|e| db_err("Count history", e))
    }

    /// Drop every history entry. Returns how many were removed.
    pub fn clear_history(&self) -> Result<usize> {
        let removed = self
            .conn()?
            .execute("DELETE FROM wake_history", [])
            .map_err(|e| db_err("Clear history", e))?;
        tracing::info!("🧹 Wake history cleared ({removed} entries)");
        Ok(removed)
    }
}

impl HistoryRecorder for WakeDb {
    fn record_wake(&self, entry: &NewHistoryEntry) -> Result<HistoryEntry> {
        WakeDb::record_wake(self, entry)
    }
}
