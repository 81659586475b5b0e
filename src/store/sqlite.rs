//! SQLite backend
//!
//! Appends run in `BEGIN IMMEDIATE` transactions, so concurrent writers (other
//! processes sharing the file included) serialize on the database write lock
//! and observe each other's high-water marks. The fingerprint index is a
//! `UNIQUE (context, fingerprint)` constraint.
//!
//! Mutations go through one writer connection. Reads are spread round-robin
//! over a pool of read-only connections, which under WAL never wait behind an
//! in-flight write transaction. Multi-statement reads run inside one deferred
//! transaction so they see a single snapshot.
//!
//! # Schema
//!
//! ```sql
//! schemas            (context, id, format, schema, canonical, fingerprint, created_at)
//! schema_references  (context, schema_id, position, name, ref_subject, ref_version)
//! id_sequences       (context, next_id)
//! subjects           (context, subject, high_water)
//! versions           (context, subject, version, schema_id, created_at, deleted)
//! configs            (context, scope, level)
//! modes              (context, scope, mode)
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{
    params, Connection, ErrorCode, OpenFlags, OptionalExtension, Transaction, TransactionBehavior,
};
use tracing::debug;

use super::{AppendOutcome, AppendRequest, RegistryStore, Scope, SubjectState};
use crate::compatibility::CompatibilityMode;
use crate::context::ContextName;
use crate::error::{RegistryError, Result};
use crate::fingerprint::Fingerprint;
use crate::mode::WriteMode;
use crate::schema::{SchemaFormat, SchemaId, SchemaRecord, SchemaReference, SubjectVersion};

/// Default wait for the database write lock
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default number of read-only connections opened next to the writer
pub const DEFAULT_READ_POOL_SIZE: usize = 4;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS schemas (
    context TEXT NOT NULL,
    id INTEGER NOT NULL,
    format TEXT NOT NULL,
    schema TEXT NOT NULL,
    canonical TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (context, id),
    UNIQUE (context, fingerprint)
);
CREATE TABLE IF NOT EXISTS schema_references (
    context TEXT NOT NULL,
    schema_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    name TEXT NOT NULL,
    ref_subject TEXT NOT NULL,
    ref_version INTEGER NOT NULL,
    PRIMARY KEY (context, schema_id, position)
);
CREATE INDEX IF NOT EXISTS idx_schema_references_target
    ON schema_references (context, ref_subject, ref_version);
CREATE TABLE IF NOT EXISTS id_sequences (
    context TEXT PRIMARY KEY,
    next_id INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS subjects (
    context TEXT NOT NULL,
    subject TEXT NOT NULL,
    high_water INTEGER NOT NULL,
    PRIMARY KEY (context, subject)
);
CREATE TABLE IF NOT EXISTS versions (
    context TEXT NOT NULL,
    subject TEXT NOT NULL,
    version INTEGER NOT NULL,
    schema_id INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (context, subject, version)
);
CREATE INDEX IF NOT EXISTS idx_versions_schema ON versions (context, schema_id);
CREATE TABLE IF NOT EXISTS configs (
    context TEXT NOT NULL,
    scope TEXT NOT NULL,
    level TEXT NOT NULL,
    PRIMARY KEY (context, scope)
);
CREATE TABLE IF NOT EXISTS modes (
    context TEXT NOT NULL,
    scope TEXT NOT NULL,
    mode TEXT NOT NULL,
    PRIMARY KEY (context, scope)
);
";

/// Registry state in a SQLite database
///
/// Connections are not `Sync`; each one sits behind its own mutex.
pub struct SqliteStore {
    /// Every mutation runs here
    writer: Mutex<Connection>,
    /// Read-only connections; empty for in-memory databases, which reads then share with the writer
    readers: Vec<Mutex<Connection>>,
    read_cursor: AtomicUsize,
}

impl SqliteStore {
    /// Open (creating if needed) a database file with the default read pool
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        Self::open_with_readers(path, busy_timeout, DEFAULT_READ_POOL_SIZE)
    }

    /// Open a database file with `read_pool_size` read-only connections
    pub fn open_with_readers(path: impl AsRef<Path>, busy_timeout: Duration, read_pool_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let writer = Connection::open_with_flags(path, flags)?;
        writer.execute_batch("PRAGMA journal_mode = wal;")?;
        writer.execute_batch("PRAGMA synchronous = full;")?;
        writer.busy_timeout(busy_timeout)?;
        writer.execute_batch(SCHEMA)?;

        let mut readers = Vec::with_capacity(read_pool_size);
        for _ in 0..read_pool_size {
            let reader = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )?;
            reader.busy_timeout(busy_timeout)?;
            readers.push(Mutex::new(reader));
        }
        debug!(path = %path.display(), readers = read_pool_size, "opened sqlite store");

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            read_cursor: AtomicUsize::new(0),
        })
    }

    /// In-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let writer = Connection::open_in_memory()?;
        writer.execute_batch(SCHEMA)?;
        Ok(Self {
            writer: Mutex::new(writer),
            readers: Vec::new(),
            read_cursor: AtomicUsize::new(0),
        })
    }

    /// Number of dedicated read connections
    pub fn read_pool_size(&self) -> usize {
        self.readers.len()
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        if self.readers.is_empty() {
            return self.writer.lock();
        }
        let index = self.read_cursor.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[index].lock()
    }
}

fn timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RegistryError::Internal(format!("corrupt timestamp '{}': {}", raw, e)))
}

struct RawRecord {
    id: u32,
    format: String,
    schema: String,
    canonical: String,
    fingerprint: String,
    created_at: String,
}

const RECORD_COLUMNS: &str = "id, format, schema, canonical, fingerprint, created_at";

fn raw_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        format: row.get(1)?,
        schema: row.get(2)?,
        canonical: row.get(3)?,
        fingerprint: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn load_record(conn: &Connection, context: &ContextName, raw: RawRecord) -> Result<SchemaRecord> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, ref_subject, ref_version FROM schema_references
         WHERE context = ?1 AND schema_id = ?2 ORDER BY position",
    )?;
    let references = stmt
        .query_map(params![context.as_str(), raw.id], |row| {
            Ok(SchemaReference::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(SchemaRecord {
        id: SchemaId(raw.id),
        format: SchemaFormat::from_tag(&raw.format)?,
        schema: raw.schema,
        canonical: raw.canonical,
        fingerprint: Fingerprint::from(raw.fingerprint),
        references,
        created_at: parse_timestamp(&raw.created_at)?,
    })
}

fn record_by_id(conn: &Connection, context: &ContextName, id: SchemaId) -> Result<Option<SchemaRecord>> {
    let raw = conn
        .prepare_cached(&format!("SELECT {} FROM schemas WHERE context = ?1 AND id = ?2", RECORD_COLUMNS))?
        .query_row(params![context.as_str(), id.0], raw_record)
        .optional()?;
    raw.map(|r| load_record(conn, context, r)).transpose()
}

fn record_by_fingerprint(conn: &Connection, context: &ContextName, fingerprint: &Fingerprint) -> Result<Option<SchemaRecord>> {
    let raw = conn
        .prepare_cached(&format!(
            "SELECT {} FROM schemas WHERE context = ?1 AND fingerprint = ?2",
            RECORD_COLUMNS
        ))?
        .query_row(params![context.as_str(), fingerprint.as_str()], raw_record)
        .optional()?;
    raw.map(|r| load_record(conn, context, r)).transpose()
}

fn raw_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, u32, u32, String, bool)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_version(raw: (String, u32, u32, String, bool)) -> Result<SubjectVersion> {
    let (subject, version, schema_id, created_at, deleted) = raw;
    Ok(SubjectVersion {
        subject,
        version,
        schema_id: SchemaId(schema_id),
        created_at: parse_timestamp(&created_at)?,
        deleted,
    })
}

fn subject_versions(conn: &Connection, context: &ContextName, subject: &str) -> Result<Vec<SubjectVersion>> {
    let mut stmt = conn.prepare_cached(
        "SELECT subject, version, schema_id, created_at, deleted FROM versions
         WHERE context = ?1 AND subject = ?2 ORDER BY version",
    )?;
    let rows = stmt
        .query_map(params![context.as_str(), subject], raw_version)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(into_version).collect()
}

fn high_water(conn: &Connection, context: &ContextName, subject: &str) -> Result<u32> {
    Ok(conn
        .prepare_cached("SELECT high_water FROM subjects WHERE context = ?1 AND subject = ?2")?
        .query_row(params![context.as_str(), subject], |row| row.get(0))
        .optional()?
        .unwrap_or(0))
}

fn subject_not_found(subject: &str) -> RegistryError {
    RegistryError::SubjectNotFound {
        subject: subject.to_string(),
    }
}

fn insert_record(tx: &Transaction<'_>, context: &ContextName, record: &SchemaRecord) -> Result<()> {
    let inserted = tx.execute(
        "INSERT INTO schemas (context, id, format, schema, canonical, fingerprint, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            context.as_str(),
            record.id.0,
            record.format.as_str(),
            record.schema,
            record.canonical,
            record.fingerprint.as_str(),
            timestamp(&record.created_at),
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
            return Err(RegistryError::DuplicateIdOnImport {
                id: record.id,
                reason: "id or content is already registered".to_string(),
            });
        }
        Err(err) => return Err(err.into()),
    }
    for (position, reference) in record.references.iter().enumerate() {
        tx.execute(
            "INSERT INTO schema_references (context, schema_id, position, name, ref_subject, ref_version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                context.as_str(),
                record.id.0,
                position as i64,
                reference.name,
                reference.subject,
                reference.version,
            ],
        )?;
    }
    Ok(())
}

impl RegistryStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn schema_by_id(&self, context: &ContextName, id: SchemaId) -> Result<Option<SchemaRecord>> {
        record_by_id(&self.reader(), context, id)
    }

    fn schema_by_fingerprint(&self, context: &ContextName, fingerprint: &Fingerprint) -> Result<Option<SchemaRecord>> {
        record_by_fingerprint(&self.reader(), context, fingerprint)
    }

    fn append_version(&self, context: &ContextName, request: AppendRequest<'_>) -> Result<AppendOutcome> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let draft = request.draft;
        let ctx = context.as_str();

        let known = record_by_fingerprint(&tx, context, &draft.fingerprint)?;
        if let Some(record) = &known {
            if request.explicit_id.map_or(true, |explicit| explicit == record.id) {
                let existing = subject_versions(&tx, context, request.subject)?
                    .into_iter()
                    .find(|v| !v.deleted && v.schema_id == record.id);
                if let Some(version) = existing {
                    return Ok(AppendOutcome::Existing {
                        version,
                        record: record.clone(),
                    });
                }
            }
        }

        let current = high_water(&tx, context, request.subject)?;
        if let Some(expected) = request.expected_head {
            if current != expected {
                return Ok(AppendOutcome::HeadMoved { current });
            }
        }

        let number = match request.explicit_version {
            // numbers up to the high-water mark are live, soft-deleted or retired
            Some(v) if v <= current => {
                return Err(RegistryError::VersionAlreadyExists {
                    subject: request.subject.to_string(),
                    version: v,
                })
            }
            Some(v) => v,
            None => current + 1,
        };

        let next_id: u32 = tx
            .query_row("SELECT next_id FROM id_sequences WHERE context = ?1", params![ctx], |row| row.get(0))
            .optional()?
            .unwrap_or(1);

        let (record, new_schema) = match (request.explicit_id, known) {
            (Some(explicit), Some(bound)) if explicit != bound.id => {
                return Err(RegistryError::DuplicateIdOnImport {
                    id: explicit,
                    reason: format!("content is already registered as id {}", bound.id),
                })
            }
            (_, Some(bound)) => (bound, false),
            (Some(explicit), None) => {
                if record_by_id(&tx, context, explicit)?.is_some() {
                    return Err(RegistryError::DuplicateIdOnImport {
                        id: explicit,
                        reason: "id is already bound to different content".to_string(),
                    });
                }
                (SchemaRecord::from_draft(explicit, draft), true)
            }
            (None, None) => (SchemaRecord::from_draft(SchemaId(next_id), draft), true),
        };

        if new_schema {
            insert_record(&tx, context, &record)?;
            tx.execute(
                "INSERT INTO id_sequences (context, next_id) VALUES (?1, ?2)
                 ON CONFLICT (context) DO UPDATE SET next_id = MAX(next_id, excluded.next_id)",
                params![ctx, next_id.max(record.id.0 + 1)],
            )?;
        }

        let version = SubjectVersion {
            subject: request.subject.to_string(),
            version: number,
            schema_id: record.id,
            created_at: Utc::now(),
            deleted: false,
        };
        tx.execute(
            "INSERT INTO versions (context, subject, version, schema_id, created_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![ctx, request.subject, number, record.id.0, timestamp(&version.created_at)],
        )?;
        tx.execute(
            "INSERT INTO subjects (context, subject, high_water) VALUES (?1, ?2, ?3)
             ON CONFLICT (context, subject) DO UPDATE SET high_water = MAX(high_water, excluded.high_water)",
            params![ctx, request.subject, number],
        )?;
        tx.commit()?;
        debug!(context = %context, subject = request.subject, version = number, id = %record.id, "appended version");

        Ok(AppendOutcome::Appended {
            version,
            record,
            new_schema,
        })
    }

    fn subject_state(&self, context: &ContextName, subject: &str) -> Result<SubjectState> {
        let mut conn = self.reader();
        let snapshot = conn.transaction()?;
        Ok(SubjectState {
            high_water: high_water(&snapshot, context, subject)?,
            versions: subject_versions(&snapshot, context, subject)?,
        })
    }

    fn subjects(&self, context: &ContextName, include_deleted: bool) -> Result<Vec<String>> {
        let conn = self.reader();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT subject FROM versions
             WHERE context = ?1 AND (?2 OR deleted = 0) ORDER BY subject",
        )?;
        let subjects = stmt
            .query_map(params![context.as_str(), include_deleted], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(subjects)
    }

    fn versions_for_id(&self, context: &ContextName, id: SchemaId) -> Result<Vec<SubjectVersion>> {
        let conn = self.reader();
        let mut stmt = conn.prepare_cached(
            "SELECT subject, version, schema_id, created_at, deleted FROM versions
             WHERE context = ?1 AND schema_id = ?2 ORDER BY subject, version",
        )?;
        let rows = stmt
            .query_map(params![context.as_str(), id.0], raw_version)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_version).collect()
    }

    fn referenced_by(&self, context: &ContextName, subject: &str, version: u32) -> Result<Vec<SchemaId>> {
        let conn = self.reader();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT r.schema_id FROM schema_references r
             JOIN versions v ON v.context = r.context AND v.schema_id = r.schema_id
             WHERE r.context = ?1 AND r.ref_subject = ?2 AND r.ref_version = ?3 AND v.deleted = 0
             ORDER BY r.schema_id",
        )?;
        let ids = stmt
            .query_map(params![context.as_str(), subject, version], |row| row.get::<_, u32>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(SchemaId).collect())
    }

    fn soft_delete_subject(&self, context: &ContextName, subject: &str) -> Result<Vec<u32>> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let versions = subject_versions(&tx, context, subject)?;
        if versions.is_empty() {
            return Err(subject_not_found(subject));
        }
        let live: Vec<u32> = versions.iter().filter(|v| !v.deleted).map(|v| v.version).collect();
        if live.is_empty() {
            return Err(RegistryError::SubjectAlreadyDeleted {
                subject: subject.to_string(),
            });
        }
        tx.execute(
            "UPDATE versions SET deleted = 1 WHERE context = ?1 AND subject = ?2",
            params![context.as_str(), subject],
        )?;
        tx.commit()?;
        Ok(live)
    }

    fn hard_delete_subject(&self, context: &ContextName, subject: &str) -> Result<Vec<u32>> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let versions = subject_versions(&tx, context, subject)?;
        if versions.is_empty() {
            return Err(subject_not_found(subject));
        }
        if versions.iter().any(|v| !v.deleted) {
            return Err(RegistryError::SubjectNotSoftDeleted {
                subject: subject.to_string(),
            });
        }
        let ctx = context.as_str();
        tx.execute("DELETE FROM versions WHERE context = ?1 AND subject = ?2", params![ctx, subject])?;
        tx.execute("DELETE FROM configs WHERE context = ?1 AND scope = ?2", params![ctx, subject])?;
        tx.execute("DELETE FROM modes WHERE context = ?1 AND scope = ?2", params![ctx, subject])?;
        tx.commit()?;
        Ok(versions.into_iter().map(|v| v.version).collect())
    }

    fn soft_delete_version(&self, context: &ContextName, subject: &str, version: u32) -> Result<()> {
        let conn = self.writer.lock();
        let updated = conn.execute(
            "UPDATE versions SET deleted = 1
             WHERE context = ?1 AND subject = ?2 AND version = ?3 AND deleted = 0",
            params![context.as_str(), subject, version],
        )?;
        if updated == 0 {
            if subject_versions(&conn, context, subject)?.is_empty() {
                return Err(subject_not_found(subject));
            }
            return Err(RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version: version.to_string(),
            });
        }
        Ok(())
    }

    fn hard_delete_version(&self, context: &ContextName, subject: &str, version: u32) -> Result<()> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let versions = subject_versions(&tx, context, subject)?;
        if versions.is_empty() {
            return Err(subject_not_found(subject));
        }
        match versions.iter().find(|v| v.version == version) {
            None => Err(RegistryError::VersionNotFound {
                subject: subject.to_string(),
                version: version.to_string(),
            }),
            Some(v) if !v.deleted => Err(RegistryError::VersionNotSoftDeleted {
                subject: subject.to_string(),
                version,
            }),
            Some(_) => {
                tx.execute(
                    "DELETE FROM versions WHERE context = ?1 AND subject = ?2 AND version = ?3",
                    params![context.as_str(), subject, version],
                )?;
                tx.commit()?;
                Ok(())
            }
        }
    }

    fn get_config(&self, context: &ContextName, scope: &Scope) -> Result<Option<CompatibilityMode>> {
        let conn = self.reader();
        let level: Option<String> = conn
            .prepare_cached("SELECT level FROM configs WHERE context = ?1 AND scope = ?2")?
            .query_row(params![context.as_str(), scope.key()], |row| row.get(0))
            .optional()?;
        level.map(|l| l.parse()).transpose()
    }

    fn set_config(&self, context: &ContextName, scope: &Scope, level: CompatibilityMode) -> Result<()> {
        self.writer.lock().execute(
            "INSERT INTO configs (context, scope, level) VALUES (?1, ?2, ?3)
             ON CONFLICT (context, scope) DO UPDATE SET level = excluded.level",
            params![context.as_str(), scope.key(), level.as_str()],
        )?;
        Ok(())
    }

    fn delete_config(&self, context: &ContextName, scope: &Scope) -> Result<Option<CompatibilityMode>> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let level: Option<String> = tx
            .query_row(
                "SELECT level FROM configs WHERE context = ?1 AND scope = ?2",
                params![context.as_str(), scope.key()],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute(
            "DELETE FROM configs WHERE context = ?1 AND scope = ?2",
            params![context.as_str(), scope.key()],
        )?;
        tx.commit()?;
        level.map(|l| l.parse()).transpose()
    }

    fn get_mode(&self, context: &ContextName, scope: &Scope) -> Result<Option<WriteMode>> {
        let conn = self.reader();
        let mode: Option<String> = conn
            .prepare_cached("SELECT mode FROM modes WHERE context = ?1 AND scope = ?2")?
            .query_row(params![context.as_str(), scope.key()], |row| row.get(0))
            .optional()?;
        mode.map(|m| m.parse()).transpose()
    }

    fn set_mode(&self, context: &ContextName, scope: &Scope, mode: WriteMode) -> Result<()> {
        self.writer.lock().execute(
            "INSERT INTO modes (context, scope, mode) VALUES (?1, ?2, ?3)
             ON CONFLICT (context, scope) DO UPDATE SET mode = excluded.mode",
            params![context.as_str(), scope.key(), mode.as_str()],
        )?;
        Ok(())
    }

    fn delete_mode(&self, context: &ContextName, scope: &Scope) -> Result<Option<WriteMode>> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mode: Option<String> = tx
            .query_row(
                "SELECT mode FROM modes WHERE context = ?1 AND scope = ?2",
                params![context.as_str(), scope.key()],
                |row| row.get(0),
            )
            .optional()?;
        tx.execute(
            "DELETE FROM modes WHERE context = ?1 AND scope = ?2",
            params![context.as_str(), scope.key()],
        )?;
        tx.commit()?;
        mode.map(|m| m.parse()).transpose()
    }

    fn contexts(&self) -> Result<Vec<ContextName>> {
        let conn = self.reader();
        let mut stmt = conn.prepare_cached(
            "SELECT context FROM versions
             UNION SELECT context FROM configs
             UNION SELECT context FROM modes
             ORDER BY 1",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        names
            .iter()
            .map(|n| ContextName::parse(n))
            .filter(|c| !matches!(c, Ok(c) if c.is_global()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn test_sqlite_store_contract() {
        contract::run_all(|| SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn test_file_store_contract_with_read_pool() {
        let dir = tempfile::tempdir().unwrap();
        let opened = AtomicUsize::new(0);
        contract::run_all(|| {
            let n = opened.fetch_add(1, Ordering::Relaxed);
            SqliteStore::open(dir.path().join(format!("contract-{}.db", n)), Duration::from_millis(500)).unwrap()
        });
    }

    #[test]
    fn test_reads_do_not_wait_for_open_write_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("registry.db"), Duration::from_millis(100)).unwrap();
        let ctx = ContextName::default_context();
        let draft = contract::record(1);
        store
            .append_version(
                &ctx,
                AppendRequest {
                    subject: "orders",
                    draft: &draft,
                    expected_head: Some(0),
                    explicit_id: None,
                    explicit_version: None,
                },
            )
            .unwrap();

        let mut writer = store.writer.lock();
        let tx = writer.transaction_with_behavior(TransactionBehavior::Immediate).unwrap();
        tx.execute("UPDATE subjects SET high_water = 99 WHERE subject = 'orders'", [])
            .unwrap();

        // every pooled reader answers from the last committed snapshot
        assert_eq!(store.read_pool_size(), DEFAULT_READ_POOL_SIZE);
        for _ in 0..DEFAULT_READ_POOL_SIZE {
            assert_eq!(store.subject_state(&ctx, "orders").unwrap().high_water, 1);
        }
        assert_eq!(store.subjects(&ctx, false).unwrap(), vec!["orders".to_string()]);
        assert!(store.schema_by_fingerprint(&ctx, &draft.fingerprint).unwrap().is_some());
        drop(tx);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");
        let ctx = ContextName::parse(".persist").unwrap();
        let draft = contract::record(1);
        {
            let store = SqliteStore::open(&path, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)).unwrap();
            let outcome = store
                .append_version(
                    &ctx,
                    AppendRequest {
                        subject: "orders",
                        draft: &draft,
                        expected_head: Some(0),
                        explicit_id: None,
                        explicit_version: None,
                    },
                )
                .unwrap();
            assert!(matches!(outcome, AppendOutcome::Appended { new_schema: true, .. }));
            store.set_mode(&ctx, &Scope::Context, WriteMode::ReadOnly).unwrap();
        }

        let store = SqliteStore::open(&path, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)).unwrap();
        let record = store.schema_by_fingerprint(&ctx, &draft.fingerprint).unwrap().unwrap();
        assert_eq!(record.id, SchemaId(1));
        assert_eq!(record.canonical, draft.canonical);
        assert_eq!(store.subject_state(&ctx, "orders").unwrap().high_water, 1);
        assert_eq!(store.get_mode(&ctx, &Scope::Context).unwrap(), Some(WriteMode::ReadOnly));
        assert_eq!(store.contexts().unwrap(), vec![ctx]);
    }
}
