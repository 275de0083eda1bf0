use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;
use crate::replay::ReplayFrame;
use crate::time_series::TimeSeriesPoint;

/// Everything handed off when a session completes.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub session_id: String,
    pub text: String,
    pub wpm: f64,
    pub raw_wpm: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub duration_ms: u64,
    pub total_keystrokes: u64,
    pub errors_by_char: BTreeMap<char, u32>,
    pub graph_samples: Vec<TimeSeriesPoint>,
    pub replay: Vec<ReplayFrame>,
    /// Mission outcome label, when the attempt ran as a mission.
    pub mission: Option<String>,
    pub recorded_at: DateTime<Local>,
}

/// Flat row used for listings and CSV export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub session_id: String,
    pub recorded_at: String,
    pub wpm: f64,
    pub raw_wpm: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub duration_ms: u64,
    pub keystrokes: u64,
    pub mission: String,
    pub text: String,
}

/// Persistence/sync collaborator. Called at session completion only;
/// failures are logged by the caller and never retried inline.
pub trait AttemptSink {
    fn record_attempt(&mut self, attempt: &AttemptRecord) -> Result<()>;

    fn push_to_cloud(&mut self) -> Result<()> {
        Ok(())
    }

    fn pull_from_cloud(&mut self) -> Result<()> {
        Ok(())
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS attempts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    text TEXT NOT NULL,
    wpm REAL NOT NULL,
    raw_wpm REAL NOT NULL,
    accuracy REAL NOT NULL,
    consistency REAL NOT NULL,
    duration_ms INTEGER NOT NULL,
    keystrokes INTEGER NOT NULL,
    errors_json TEXT NOT NULL,
    samples_json TEXT NOT NULL,
    replay_json TEXT NOT NULL,
    mission TEXT,
    recorded_at TEXT NOT NULL,
    synced BOOLEAN NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_attempts_text ON attempts(text);
CREATE INDEX IF NOT EXISTS idx_attempts_recorded_at ON attempts(recorded_at);
"#;

/// SQLite-backed attempt history, optionally mirrored to a CSV log on sync.
#[derive(Debug)]
pub struct SqliteAttemptStore {
    conn: Connection,
    mirror_path: Option<PathBuf>,
}

impl SqliteAttemptStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            mirror_path: None,
        })
    }

    /// Attempts pushed by [`AttemptSink::push_to_cloud`] are appended here.
    pub fn with_mirror<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.mirror_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn record(&self, attempt: &AttemptRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO attempts
            (session_id, text, wpm, raw_wpm, accuracy, consistency, duration_ms, keystrokes,
             errors_json, samples_json, replay_json, mission, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                attempt.session_id,
                attempt.text,
                attempt.wpm,
                attempt.raw_wpm,
                attempt.accuracy,
                attempt.consistency,
                attempt.duration_ms as i64,
                attempt.total_keystrokes as i64,
                serde_json::to_string(&attempt.errors_by_char)?,
                serde_json::to_string(&attempt.graph_samples)?,
                serde_json::to_string(&attempt.replay)?,
                attempt.mission,
                attempt.recorded_at.to_rfc3339(),
            ],
        )?;
        debug!(session = %attempt.session_id, "attempt recorded");
        Ok(())
    }

    pub fn recent_attempts(&self, limit: usize) -> Result<Vec<AttemptSummary>> {
        self.query_summaries(
            "SELECT session_id, recorded_at, wpm, raw_wpm, accuracy, consistency, duration_ms,
                    keystrokes, mission, text
             FROM attempts ORDER BY id DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    fn query_summaries(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AttemptSummary>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(AttemptSummary {
                session_id: row.get(0)?,
                recorded_at: row.get(1)?,
                wpm: row.get(2)?,
                raw_wpm: row.get(3)?,
                accuracy: row.get(4)?,
                consistency: row.get(5)?,
                duration_ms: row.get::<_, i64>(6)? as u64,
                keystrokes: row.get::<_, i64>(7)? as u64,
                mission: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
                text: row.get(9)?,
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok(summaries)
    }

    /// Replay log of the fastest recorded attempt on `text`.
    pub fn best_replay(&self, text: &str) -> Result<Option<Vec<ReplayFrame>>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT replay_json FROM attempts WHERE text = ?1 ORDER BY wpm DESC LIMIT 1",
                [text],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn errors_for(&self, session_id: &str) -> Result<BTreeMap<char, u32>> {
        let json: String = self.conn.query_row(
            "SELECT errors_json FROM attempts WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn unsynced_count(&self) -> Result<usize> {
        let n: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM attempts WHERE synced = 0", [], |row| {
                    row.get(0)
                })?;
        Ok(n as usize)
    }

    fn mirror_unsynced(&mut self, path: &Path) -> Result<usize> {
        let pending = self.query_summaries(
            "SELECT session_id, recorded_at, wpm, raw_wpm, accuracy, consistency, duration_ms,
                    keystrokes, mission, text
             FROM attempts WHERE synced = 0 ORDER BY id",
            [],
        )?;
        if pending.is_empty() {
            return Ok(0);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let needs_header = !path.exists();
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        write_csv(file, &pending, needs_header)?;

        let tx = self.conn.transaction()?;
        tx.execute("UPDATE attempts SET synced = 1 WHERE synced = 0", [])?;
        tx.commit()?;
        Ok(pending.len())
    }
}

impl AttemptSink for SqliteAttemptStore {
    fn record_attempt(&mut self, attempt: &AttemptRecord) -> Result<()> {
        self.record(attempt)
    }

    fn push_to_cloud(&mut self) -> Result<()> {
        if let Some(path) = self.mirror_path.clone() {
            let pushed = self.mirror_unsynced(&path)?;
            info!(pushed, mirror = %path.display(), "attempts synced");
        }
        Ok(())
    }

    /// Marks attempts already present in the mirror as synced, so a push
    /// interrupted before its bookkeeping does not append them twice.
    fn pull_from_cloud(&mut self) -> Result<()> {
        let Some(path) = self.mirror_path.clone() else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let mut rdr = csv::Reader::from_path(&path)?;
        let tx = self.conn.transaction()?;
        let mut reconciled = 0;
        for row in rdr.deserialize::<AttemptSummary>() {
            let row = row?;
            reconciled += tx.execute(
                "UPDATE attempts SET synced = 1 WHERE session_id = ?1 AND synced = 0",
                [&row.session_id],
            )?;
        }
        tx.commit()?;
        debug!(reconciled, mirror = %path.display(), "mirror pulled");
        Ok(())
    }
}

pub fn write_csv<W: Write>(writer: W, rows: &[AttemptSummary], header: bool) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(header)
        .from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn attempt(session_id: &str, text: &str, wpm: f64) -> AttemptRecord {
        let mut errors = BTreeMap::new();
        errors.insert('a', 1);
        AttemptRecord {
            session_id: session_id.to_string(),
            text: text.to_string(),
            wpm,
            raw_wpm: wpm + 4.0,
            accuracy: 97.5,
            consistency: 81.0,
            duration_ms: 12_000,
            total_keystrokes: 60,
            errors_by_char: errors,
            graph_samples: vec![TimeSeriesPoint::new(1.0, wpm, wpm + 4.0)],
            replay: vec![ReplayFrame::new('a', 0), ReplayFrame::new('b', 180)],
            mission: None,
            recorded_at: Local::now(),
        }
    }

    #[test]
    fn record_and_list_recent() {
        let mut store = SqliteAttemptStore::open_in_memory().unwrap();
        store.record_attempt(&attempt("s1", "ab", 40.0)).unwrap();
        store.record_attempt(&attempt("s2", "ab", 55.0)).unwrap();

        let recent = store.recent_attempts(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].session_id, "s2");
        assert_eq!(recent[0].keystrokes, 60);
    }

    #[test]
    fn errors_round_trip() {
        let store = SqliteAttemptStore::open_in_memory().unwrap();
        store.record(&attempt("s1", "ab", 40.0)).unwrap();
        assert_eq!(store.errors_for("s1").unwrap().get(&'a'), Some(&1));
    }

    #[test]
    fn best_replay_picks_fastest_attempt() {
        let store = SqliteAttemptStore::open_in_memory().unwrap();
        let mut slow = attempt("s1", "ab", 30.0);
        slow.replay = vec![ReplayFrame::new('a', 0), ReplayFrame::new('b', 900)];
        store.record(&slow).unwrap();
        store.record(&attempt("s2", "ab", 70.0)).unwrap();

        let best = store.best_replay("ab").unwrap().unwrap();
        assert_eq!(best[1].time, 180);
        assert!(store.best_replay("other").unwrap().is_none());
    }

    #[test]
    fn push_mirrors_unsynced_to_csv_once() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("sync").join("attempts.csv");
        let mut store = SqliteAttemptStore::open(dir.path().join("ghosttype.db"))
            .unwrap()
            .with_mirror(&mirror);

        store.record_attempt(&attempt("s1", "ab", 40.0)).unwrap();
        assert_eq!(store.unsynced_count().unwrap(), 1);
        store.push_to_cloud().unwrap();
        assert_eq!(store.unsynced_count().unwrap(), 0);

        store.record_attempt(&attempt("s2", "ab", 41.0)).unwrap();
        store.push_to_cloud().unwrap();

        let content = std::fs::read_to_string(&mirror).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("session_id,"));
        assert!(lines[1].starts_with("s1,"));
        assert!(lines[2].starts_with("s2,"));
    }

    #[test]
    fn pull_marks_mirrored_attempts_synced() {
        let dir = tempdir().unwrap();
        let mirror = dir.path().join("attempts.csv");
        let mut store = SqliteAttemptStore::open(dir.path().join("ghosttype.db"))
            .unwrap()
            .with_mirror(&mirror);
        store.record_attempt(&attempt("s1", "ab, cd", 40.0)).unwrap();
        store.record_attempt(&attempt("s2", "ab", 41.0)).unwrap();

        // s1 reached the mirror but the push never flagged it
        let rows = store.recent_attempts(10).unwrap();
        let s1: Vec<AttemptSummary> = rows
            .into_iter()
            .filter(|r| r.session_id == "s1")
            .collect();
        write_csv(std::fs::File::create(&mirror).unwrap(), &s1, true).unwrap();

        store.pull_from_cloud().unwrap();
        assert_eq!(store.unsynced_count().unwrap(), 1);

        store.push_to_cloud().unwrap();
        let content = std::fs::read_to_string(&mirror).unwrap();
        assert_eq!(content.lines().count(), 3);
        assert_eq!(content.matches("s1,").count(), 1);
    }

    #[test]
    fn push_without_mirror_is_noop() {
        let mut store = SqliteAttemptStore::open_in_memory().unwrap();
        store.record_attempt(&attempt("s1", "ab", 40.0)).unwrap();
        store.push_to_cloud().unwrap();
        store.pull_from_cloud().unwrap();
        assert_eq!(store.unsynced_count().unwrap(), 1);
    }
}
