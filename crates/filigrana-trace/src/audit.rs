// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Delivery audit trail — append-only SQLite log of every processed document
// and outbound message. The security band promises the purchaser that the
// copy is "stored and traced"; this table is the traced half.
//
// Schema:
//   delivery_log(
//     id            INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp     TEXT    NOT NULL,   -- RFC 3339
//     action        TEXT    NOT NULL,   -- e.g. "watermark", "send", "compress"
//     document_hash TEXT    NOT NULL,   -- SHA-256 hex of the watermarked bytes
//     recipient     TEXT    NOT NULL,   -- purchaser email
//     success       INTEGER NOT NULL,   -- 0 = failure, 1 = success
//     details       TEXT                -- optional free-form context
//   )

use std::path::Path;

use chrono::Utc;
use filigrana_core::error::FiligranaError;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Convert a `rusqlite::Error` into a `FiligranaError::Database`.
fn db_err(e: rusqlite::Error) -> FiligranaError {
    FiligranaError::Database(e.to_string())
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS delivery_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp     TEXT    NOT NULL,
    action        TEXT    NOT NULL,
    document_hash TEXT    NOT NULL,
    recipient     TEXT    NOT NULL,
    success       INTEGER NOT NULL,
    details       TEXT
);";

/// A single entry in the delivery log, used for queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub document_hash: String,
    pub recipient: String,
    pub success: bool,
    pub details: Option<String>,
}

/// Append-only delivery audit log backed by a SQLite database.
pub struct AuditLog {
    conn: Connection,
}

impl AuditLog {
    /// Open (or create) the audit database at `path`.
    ///
    /// WAL mode is enabled for better concurrent-read performance.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FiligranaError> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!("delivery audit log opened");
        Ok(Self { conn })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self, FiligranaError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!("in-memory delivery audit log opened");
        Ok(Self { conn })
    }

    /// Record a new audit entry.
    ///
    /// `action` is a short verb describing the pipeline step ("watermark",
    /// "compress", "send", ...); `document_hash` is the SHA-256 digest that
    /// is also printed on the security band, tying the log row to the
    /// physical copy.
    pub fn record(
        &self,
        action: &str,
        document_hash: &str,
        recipient: &str,
        success: bool,
        details: Option<&str>,
    ) -> Result<(), FiligranaError> {
        let timestamp = Utc::now().to_rfc3339();
        let success_int: i32 = if success { 1 } else { 0 };

        self.conn
            .execute(
                "INSERT INTO delivery_log
                     (timestamp, action, document_hash, recipient, success, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![timestamp, action, document_hash, recipient, success_int, details],
            )
            .map_err(db_err)?;

        debug!(action, document_hash, recipient, success, "audit entry recorded");
        Ok(())
    }

    /// All entries for a given document hash, oldest first.
    pub fn entries_for_hash(
        &self,
        document_hash: &str,
    ) -> Result<Vec<AuditEntry>, FiligranaError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, action, document_hash, recipient, success, details
                 FROM delivery_log
                 WHERE document_hash = ?1
                 ORDER BY id ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![document_hash], row_to_entry)
            .map_err(db_err)?;

        collect_rows(rows)
    }

    /// All entries for a given recipient, oldest first.
    pub fn entries_for_recipient(
        &self,
        recipient: &str,
    ) -> Result<Vec<AuditEntry>, FiligranaError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, action, document_hash, recipient, success, details
                 FROM delivery_log
                 WHERE recipient = ?1
                 ORDER BY id ASC",
            )
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![recipient], row_to_entry)
            .map_err(db_err)?;

        collect_rows(rows)
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>, FiligranaError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, timestamp, action, document_hash, recipient, success, details
                 FROM delivery_log
                 ORDER BY id DESC
                 LIMIT ?1",
            )
            .map_err(db_err)?;

        let rows = stmt.query_map(params![limit], row_to_entry).map_err(db_err)?;

        collect_rows(rows)
    }

    /// Total number of entries in the log.
    pub fn count(&self) -> Result<u64, FiligranaError> {
        self.conn
            .query_row("SELECT COUNT(*) FROM delivery_log", [], |row| row.get(0))
            .map_err(db_err)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        action: row.get(2)?,
        document_hash: row.get(3)?,
        recipient: row.get(4)?,
        success: row.get::<_, i32>(5)? != 0,
        details: row.get(6)?,
    })
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<AuditEntry>>,
) -> Result<Vec<AuditEntry>, FiligranaError> {
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row.map_err(db_err)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_log() -> AuditLog {
        AuditLog::open_in_memory().expect("open in-memory audit log")
    }

    #[test]
    fn record_and_count() {
        let log = make_log();
        assert_eq!(log.count().unwrap(), 0);

        log.record("watermark", "abc123", "ana@example.com", true, None)
            .unwrap();
        log.record("send", "abc123", "ana@example.com", true, Some("group 1/1"))
            .unwrap();

        assert_eq!(log.count().unwrap(), 2);
    }

    #[test]
    fn entries_for_hash_filters_and_orders() {
        let log = make_log();
        log.record("watermark", "aaa", "ana@example.com", true, None)
            .unwrap();
        log.record("watermark", "bbb", "bob@example.com", true, None)
            .unwrap();
        log.record("send", "aaa", "ana@example.com", false, Some("smtp 552"))
            .unwrap();

        let entries = log.entries_for_hash("aaa").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "watermark");
        assert!(entries[0].success);
        assert_eq!(entries[1].action, "send");
        assert!(!entries[1].success);
        assert_eq!(entries[1].details.as_deref(), Some("smtp 552"));
    }

    #[test]
    fn entries_for_recipient() {
        let log = make_log();
        log.record("send", "h1", "ana@example.com", true, None).unwrap();
        log.record("send", "h2", "bob@example.com", true, None).unwrap();

        let entries = log.entries_for_recipient("bob@example.com").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].document_hash, "h2");
    }

    #[test]
    fn recent_entries_newest_first() {
        let log = make_log();
        for i in 0..5 {
            log.record("send", &format!("hash_{i}"), "ana@example.com", true, None)
                .unwrap();
        }

        let recent = log.recent_entries(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].id > recent[1].id);
        assert!(recent[1].id > recent[2].id);
    }
}
