use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use utter_queue::FragmentQueue;
use utter_transcript::{LineRecord, LineSink, WriteMode};

/// How long a writer waits on a database locked by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid write mode: {0}")]
    InvalidMode(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A line as stored, with its write metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredLine {
    pub key: String,
    pub mode: WriteMode,
    pub record: LineRecord,
    /// Milliseconds since epoch of the last write.
    pub updated_at: i64,
}

/// SQLite store holding both the fragment queue and the merged lines.
///
/// Producers in other processes may push into the same file; the drain runs
/// in an immediate transaction, so a concurrent push is either part of the
/// drain or stays queued.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS fragments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payload TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lines (
                key TEXT PRIMARY KEY,
                base_timestamp INTEGER NOT NULL,
                speaker TEXT NOT NULL,
                mode TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_lines_base_timestamp ON lines(base_timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_lines_mode ON lines(mode);
            "#,
        )?;
        Ok(())
    }

    /// Line stored under `key`.
    pub fn get_line(&self, key: &str) -> Result<StoredLine> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let row = conn
            .query_row(
                "SELECT key, mode, value, updated_at FROM lines WHERE key = ?1",
                [key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(format!("line {key}")))?;
        stored_line(row)
    }

    /// Most recent lines first, by base timestamp.
    pub fn list_lines(&self, limit: usize) -> Result<Vec<StoredLine>> {
        self.query_lines(
            "SELECT key, mode, value, updated_at FROM lines ORDER BY base_timestamp DESC LIMIT ?1",
            limit,
        )
    }

    /// Finalized lines only, most recent first.
    pub fn list_final_lines(&self, limit: usize) -> Result<Vec<StoredLine>> {
        self.query_lines(
            "SELECT key, mode, value, updated_at FROM lines WHERE mode = 'final' ORDER BY base_timestamp DESC LIMIT ?1",
            limit,
        )
    }

    fn query_lines(&self, sql: &str, limit: usize) -> Result<Vec<StoredLine>> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut lines = Vec::new();
        for row in rows {
            match stored_line(row?) {
                Ok(line) => lines.push(line),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable line"),
            }
        }
        Ok(lines)
    }
}

fn stored_line((key, mode, value, updated_at): (String, String, String, i64)) -> Result<StoredLine> {
    let mode = WriteMode::parse(&mode).ok_or(StorageError::InvalidMode(mode))?;
    let record = serde_json::from_str(&value)?;
    Ok(StoredLine {
        key,
        mode,
        record,
        updated_at,
    })
}

impl LineSink for Database {
    type Error = StorageError;

    fn write(&self, record: &LineRecord, mode: WriteMode) -> Result<()> {
        let value = serde_json::to_string(record)?;
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.execute(
            "INSERT OR REPLACE INTO lines (key, base_timestamp, speaker, mode, value, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                record.key(),
                record.start_timestamp,
                record.speaker_id.to_string(),
                mode.as_str(),
                value,
                chrono::Utc::now().timestamp_millis(),
            ),
        )?;
        Ok(())
    }
}

impl FragmentQueue for Database {
    type Error = StorageError;

    fn push(&self, raw: String) -> Result<()> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        conn.execute(
            "INSERT INTO fragments (payload, enqueued_at) VALUES (?1, ?2)",
            (raw, chrono::Utc::now().timestamp_millis()),
        )?;
        Ok(())
    }

    fn drain(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().expect("database mutex poisoned");
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let entries = {
            let mut stmt = tx.prepare("SELECT id, payload FROM fragments ORDER BY id")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        if let Some((last_id, _)) = entries.last() {
            tx.execute("DELETE FROM fragments WHERE id <= ?1", [last_id])?;
        }
        tx.commit()?;

        Ok(entries.into_iter().map(|(_, payload)| payload).collect())
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("database mutex poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
