//! SQLite-backed analysis cache.
//!
//! One row per track id, holding the raw analysis record as JSON exactly
//! as the analyser produced it. Normalisation happens on the way out,
//! through the ingestion adapter, so the cache never holds derived data.

use crate::error::Result;
use crate::ingest::{FeatureSource, RawAnalysisRecord};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs;
use std::path::Path;

/// Handle on the analysis cache database
#[derive(Debug)]
pub struct AnalysisStore {
    conn: Connection,
}

impl AnalysisStore {
    /// Open (creating if needed) the cache at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// database cannot be opened and migrated.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        migrate(&conn)?;
        debug!("Opened analysis cache at {}", path.display());
        Ok(Self { conn })
    }

    /// In-memory cache, handy for tests and one-shot runs.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot create the schema.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn })
    }

    /// Insert or replace the record stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or SQL failure.
    pub fn put(&self, id: &str, record: &RawAnalysisRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT INTO analysis_cache (track_id, record_json)
             VALUES (?1, ?2)
             ON CONFLICT(track_id)
             DO UPDATE SET record_json = ?2, updated_at = datetime('now')",
            params![id, json],
        )?;
        Ok(())
    }

    /// Store many records in one transaction. Records without an id or path
    /// cannot be keyed and are skipped; the number stored is returned.
    ///
    /// # Errors
    ///
    /// Returns an error on serialization or SQL failure; nothing is
    /// committed in that case.
    pub fn put_all(&mut self, records: &[RawAnalysisRecord]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut stored = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO analysis_cache (track_id, record_json)
                 VALUES (?1, ?2)
                 ON CONFLICT(track_id)
                 DO UPDATE SET record_json = ?2, updated_at = datetime('now')",
            )?;
            for record in records {
                let Some(id) = record.id.as_deref().or(record.path.as_deref()) else {
                    warn!("Record without id or path not cached");
                    continue;
                };
                stmt.execute(params![id, serde_json::to_string(record)?])?;
                stored += 1;
            }
        }
        tx.commit()?;
        info!("Cached {stored} analysis records");
        Ok(stored)
    }

    /// Number of cached records
    ///
    /// # Errors
    ///
    /// Returns an error on SQL failure.
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM analysis_cache", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// # Errors
    ///
    /// Returns an error on SQL failure.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS analysis_cache (
            track_id    TEXT PRIMARY KEY,
            record_json TEXT NOT NULL,
            updated_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;
    Ok(())
}

/// A row that is not JSON still comes back as a record, so ingestion can
/// report it as a failure.
fn decode(id: String, json: &str) -> RawAnalysisRecord {
    let mut record = match serde_json::from_str(json) {
        Ok(value) => RawAnalysisRecord::from_value(value),
        Err(err) => {
            warn!("Unreadable cache row for `{id}`: {err}");
            RawAnalysisRecord::unusable(None, format!("cache row is not JSON: {err}"))
        }
    };
    record.id.get_or_insert(id);
    record
}

impl FeatureSource for AnalysisStore {
    fn load_all(&self) -> Result<Vec<RawAnalysisRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT track_id, record_json FROM analysis_cache ORDER BY track_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, json) = row?;
            records.push(decode(id, &json));
        }
        Ok(records)
    }

    fn record(&self, id: &str) -> Result<Option<RawAnalysisRecord>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record_json FROM analysis_cache WHERE track_id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.map(|json| decode(id.to_string(), &json)))
    }
}
