//! Durable command table backed by SQLite.
//!
//! The store is a plain key-indexed table: it performs no validation and knows
//! nothing about processes beyond the last pid mirrored into each row.

use crate::model::{CommandId, CommandPatch, CommandRecord, RunState};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
}

pub struct CommandStore {
    conn: Connection,
}

impl CommandStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let current = self.schema_version()?;
        if current > SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: current,
                supported: SCHEMA_VERSION,
            });
        }

        if current < 1 {
            self.conn
                .execute_batch(include_str!("../migrations/0001_commands.sql"))?;
            self.conn.execute("PRAGMA user_version = 1", [])?;
        }

        Ok(())
    }

    /// All records in insertion order.
    pub fn list(&self) -> Result<Vec<CommandRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, cmd, path, pid, msg, disabled FROM commands ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], record_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get(&self, id: CommandId) -> Result<Option<CommandRecord>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, cmd, path, pid, msg, disabled FROM commands WHERE id = ?1",
                params![id],
                record_from_row,
            )
            .optional()?)
    }

    /// Insert the record, or replace the row with the same key. Returns the key.
    pub fn put(&self, record: &CommandRecord) -> Result<CommandId, StoreError> {
        let pid = record.run_state.pid().map(i64::from);
        match record.id {
            Some(id) => {
                self.conn.execute(
                    "INSERT OR REPLACE INTO commands (id, name, cmd, path, pid, msg, disabled)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        id,
                        record.name,
                        record.cmd,
                        record.path,
                        pid,
                        record.msg,
                        record.disabled
                    ],
                )?;
                Ok(id)
            }
            None => {
                self.conn.execute(
                    "INSERT INTO commands (name, cmd, path, pid, msg, disabled)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        record.name,
                        record.cmd,
                        record.path,
                        pid,
                        record.msg,
                        record.disabled
                    ],
                )?;
                Ok(self.conn.last_insert_rowid())
            }
        }
    }

    /// Merge `patch` into the row at `id`. Returns `false` when the key is unknown.
    pub fn update(&self, id: CommandId, patch: &CommandPatch) -> Result<bool, StoreError> {
        let Some(mut record) = self.get(id)? else {
            return Ok(false);
        };
        patch.apply(&mut record);
        let changed = self.conn.execute(
            "UPDATE commands SET name = ?2, cmd = ?3, path = ?4, pid = ?5, msg = ?6, disabled = ?7
             WHERE id = ?1",
            params![
                id,
                record.name,
                record.cmd,
                record.path,
                record.run_state.pid().map(i64::from),
                record.msg,
                record.disabled
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn delete(&self, id: CommandId) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM commands WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// No process survives a restart as ours, so persisted pids are stale at startup.
    pub fn reset_run_state(&self) -> Result<usize, StoreError> {
        Ok(self.conn.execute(
            "UPDATE commands SET pid = NULL, disabled = 0 WHERE pid IS NOT NULL OR disabled != 0",
            [],
        )?)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<CommandRecord> {
    let pid: Option<i64> = row.get(4)?;
    Ok(CommandRecord {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        cmd: row.get(2)?,
        path: row.get(3)?,
        run_state: RunState::from_pid(pid.and_then(|p| u32::try_from(p).ok())),
        msg: row.get(5)?,
        disabled: row.get(6)?,
    })
}

/// Default database location under the user's data directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cmd-deck")
        .join("commands.db")
}
