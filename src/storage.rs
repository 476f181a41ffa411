//! Persisted session logs.
//!
//! Every session is one JSON-lines file: a header naming the queued tasks, one
//! line per log item and a footer carrying the terminal status.

use crate::error::StorageError;
use crate::model::LogItem;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const LOG_PREFIX: &str = "session_log_";
const LOG_EXTENSION: &str = ".log";

/// Sink for session records. Owned by the log aggregator's worker, so
/// implementations never see concurrent calls.
pub trait SessionStore: Send + 'static {
    /// Open a new record, closing any previous one. Returns false if the
    /// record could not be created.
    fn start_session(&mut self, task_names: &[String]) -> bool;
    fn append_log(&mut self, item: &LogItem);
    fn end_session(&mut self, status: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEntry {
    Header {
        #[serde(rename = "startTime")]
        start_time: i64,
        tasks: Vec<String>,
    },
    Log {
        time: u64,
        level: String,
        content: String,
    },
    Footer {
        #[serde(rename = "endTime")]
        end_time: i64,
        status: String,
    },
}

/// Summary of a session file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionFileInfo {
    pub file_name: String,
    pub path: PathBuf,
    /// Unix milliseconds, parsed from the file name (falls back to mtime).
    pub start_time: i64,
    pub size: u64,
    pub task_count: usize,
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Default location for session logs.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskchain-supervisor")
        .join("sessions")
}

/// Writes one JSON-lines file per session under `dir`.
pub struct JsonlSessionStore {
    dir: PathBuf,
    writer: Option<BufWriter<File>>,
    current: Option<PathBuf>,
}

impl JsonlSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writer: None,
            current: None,
        }
    }

    /// Path of the record currently open, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    fn open(&mut self, task_names: &[String]) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir)?;
        // UTC, so `parse_file_name` reads it back without knowing the zone.
        let start = OffsetDateTime::now_utc();
        let stamp = start
            .format(format_description!(
                "[year][month][day]_[hour][minute][second]"
            ))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let path = self.dir.join(format!(
            "{LOG_PREFIX}{stamp}_{}{LOG_EXTENSION}",
            task_names.len()
        ));
        tracing::info!(path = %path.display(), "starting session log");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.writer = Some(BufWriter::new(file));
        self.current = Some(path);
        self.write_entry(&SessionEntry::Header {
            start_time: (start.unix_timestamp_nanos() / 1_000_000) as i64,
            tasks: task_names.to_vec(),
        })
    }

    fn write_entry(&mut self, entry: &SessionEntry) -> Result<(), StorageError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                tracing::warn!("error closing session log: {e}");
            }
        }
        self.current = None;
    }
}

impl SessionStore for JsonlSessionStore {
    fn start_session(&mut self, task_names: &[String]) -> bool {
        self.close();
        match self.open(task_names) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("failed to start session log: {e}");
                self.close();
                false
            }
        }
    }

    fn append_log(&mut self, item: &LogItem) {
        let entry = SessionEntry::Log {
            time: item.id,
            level: item.level.name().to_string(),
            content: item.content.clone(),
        };
        if let Err(e) = self.write_entry(&entry) {
            tracing::error!("failed to append to session log: {e}");
        }
    }

    fn end_session(&mut self, status: &str) {
        if self.writer.is_none() {
            return;
        }
        let footer = SessionEntry::Footer {
            end_time: now_millis(),
            status: status.to_string(),
        };
        if let Err(e) = self.write_entry(&footer) {
            tracing::error!("failed to end session log: {e}");
        }
        tracing::info!(status, "session ended");
        self.close();
    }
}

impl Drop for JsonlSessionStore {
    fn drop(&mut self) {
        self.close();
    }
}

fn is_session_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(LOG_PREFIX) && n.ends_with(LOG_EXTENSION))
            .unwrap_or(false)
}

/// Parse `session_log_YYYYMMDD_HHMMSS_N.log` into (start millis, task count).
fn parse_file_name(name: &str) -> Option<(i64, usize)> {
    let stem = name.strip_prefix(LOG_PREFIX)?.strip_suffix(LOG_EXTENSION)?;
    let mut parts = stem.split('_');
    let date = parts.next()?;
    let clock = parts.next()?;
    let count = parts.next()?.parse().ok()?;
    let started = PrimitiveDateTime::parse(
        &format!("{date}_{clock}"),
        format_description!("[year][month][day]_[hour][minute][second]"),
    )
    .ok()?
    .assume_utc();
    Some(((started.unix_timestamp_nanos() / 1_000_000) as i64, count))
}

fn session_info(path: &Path) -> Result<SessionFileInfo, StorageError> {
    let meta = fs::metadata(path)?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let (start_time, task_count) = parse_file_name(&file_name).unwrap_or_else(|| {
        tracing::warn!("could not parse session file name: {file_name}");
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        (mtime, 0)
    });
    Ok(SessionFileInfo {
        file_name,
        path: path.to_path_buf(),
        start_time,
        size: meta.len(),
        task_count,
    })
}

/// Session files under `dir`, newest first.
pub fn list_sessions(dir: &Path) -> Result<Vec<SessionFileInfo>, StorageError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_session_file(&path) {
            out.push(session_info(&path)?);
        }
    }
    out.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| b.file_name.cmp(&a.file_name))
    });
    Ok(out)
}

fn resolve(dir: &Path, name: &str) -> Result<PathBuf, StorageError> {
    // Only bare file names; no traversal out of the log directory.
    if name.contains('/') || name.contains('\\') || name == ".." {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    let path = dir.join(name);
    if !path.is_file() {
        return Err(StorageError::NotFound(name.to_string()));
    }
    Ok(path)
}

/// Read a session file. Lines that fail to parse are skipped.
pub fn read_session(dir: &Path, name: &str) -> Result<Vec<SessionEntry>, StorageError> {
    let path = resolve(dir, name)?;
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionEntry>(&line) {
            Ok(e) => entries.push(e),
            Err(_) => tracing::warn!("skipping unparsable session line: {line}"),
        }
    }
    Ok(entries)
}

pub fn delete_session(dir: &Path, name: &str) -> Result<(), StorageError> {
    let path = resolve(dir, name)?;
    fs::remove_file(&path)?;
    tracing::info!(file = name, "deleted session log");
    Ok(())
}

/// Delete session files that started more than `days` days before `now_ms`.
/// Returns how many were removed.
pub fn cleanup_older_than(dir: &Path, days: u32, now_ms: i64) -> Result<usize, StorageError> {
    let cutoff = now_ms - i64::from(days) * 24 * 60 * 60 * 1000;
    let mut deleted = 0;
    for info in list_sessions(dir)? {
        if info.start_time < cutoff {
            match fs::remove_file(&info.path) {
                Ok(()) => deleted += 1,
                Err(e) => tracing::warn!(file = %info.file_name, "failed to delete: {e}"),
            }
        }
    }
    tracing::info!(deleted, "cleaned up old session logs");
    Ok(deleted)
}

pub fn cleanup_now(dir: &Path, days: u32) -> Result<usize, StorageError> {
    cleanup_older_than(dir, days, now_millis())
}

/// In-memory store used by tests to observe what the aggregator persisted.
#[cfg(test)]
pub(crate) mod testing {
    use super::SessionStore;
    use crate::model::{ExecutionState, LogItem, LogLevel};
    use crate::orchestrator::ExecutionStateCell;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StoreEvent {
        Start(Vec<String>),
        /// Content, level, and the execution state observed at write time.
        Log(String, LogLevel, Option<ExecutionState>),
        End(String),
    }

    #[derive(Clone, Default)]
    pub struct RecordingStore {
        pub events: Arc<Mutex<Vec<StoreEvent>>>,
        pub state: Option<ExecutionStateCell>,
    }

    impl RecordingStore {
        pub fn observing(state: ExecutionStateCell) -> Self {
            Self {
                events: Arc::default(),
                state: Some(state),
            }
        }

        pub fn events(&self) -> Vec<StoreEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn end_statuses(&self) -> Vec<String> {
            self.events()
                .into_iter()
                .filter_map(|e| match e {
                    StoreEvent::End(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    impl SessionStore for RecordingStore {
        fn start_session(&mut self, task_names: &[String]) -> bool {
            self.events
                .lock()
                .unwrap()
                .push(StoreEvent::Start(task_names.to_vec()));
            true
        }

        fn append_log(&mut self, item: &LogItem) {
            let state = self.state.as_ref().map(|s| s.get());
            self.events.lock().unwrap().push(StoreEvent::Log(
                item.content.clone(),
                item.level,
                state,
            ));
        }

        fn end_session(&mut self, status: &str) {
            self.events
                .lock()
                .unwrap()
                .push(StoreEvent::End(status.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogLevel;

    #[test]
    fn writes_header_logs_and_footer() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlSessionStore::new(dir.path());
        assert!(store.start_session(&["Fight".into(), "Mall".into()]));
        let name = store
            .current_path()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap()
            .to_string();
        assert!(name.starts_with(LOG_PREFIX));
        assert!(name.ends_with("_2.log"));

        let item = LogItem::new("hello", LogLevel::Info);
        store.append_log(&item);
        store.end_session("COMPLETED");
        assert!(store.current_path().is_none());

        let entries = read_session(dir.path(), &name).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[0], SessionEntry::Header { tasks, .. } if tasks == &["Fight", "Mall"]));
        assert_eq!(
            entries[1],
            SessionEntry::Log {
                time: item.id,
                level: "INFO".into(),
                content: "hello".into(),
            }
        );
        assert!(matches!(&entries[2], SessionEntry::Footer { status, .. } if status == "COMPLETED"));
    }

    #[test]
    fn appends_without_open_session_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonlSessionStore::new(dir.path());
        store.append_log(&LogItem::new("lost", LogLevel::Info));
        store.end_session("STOPPED");
        assert!(list_sessions(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn header_line_uses_wire_field_names() {
        let line = serde_json::to_string(&SessionEntry::Header {
            start_time: 5,
            tasks: vec!["Fight".into()],
        })
        .unwrap();
        assert_eq!(line, r#"{"type":"header","startTime":5,"tasks":["Fight"]}"#);
    }

    #[test]
    fn parses_file_names() {
        let (ms, count) = parse_file_name("session_log_20260121_143052_3.log").unwrap();
        assert_eq!(count, 3);
        assert_eq!(ms, 1_769_005_852_000);
        assert!(parse_file_name("other_20260121_143052_3.log").is_none());
        assert!(parse_file_name("session_log_garbage.log").is_none());
    }

    #[test]
    fn lists_newest_first_and_cleans_up_old_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("session_log_20200101_000000_1.log"), "").unwrap();
        fs::write(dir.path().join("session_log_20260101_000000_2.log"), "").unwrap();
        fs::write(dir.path().join("unrelated.txt"), "").unwrap();

        let listed = list_sessions(dir.path()).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].task_count, 2);

        let now = parse_file_name("session_log_20260102_000000_0.log").unwrap().0;
        let removed = cleanup_older_than(dir.path(), 30, now).unwrap();
        assert_eq!(removed, 1);
        let left = list_sessions(dir.path()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].file_name, "session_log_20260101_000000_2.log");
    }

    #[test]
    fn skips_bad_lines_and_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let name = "session_log_20260101_000000_1.log";
        fs::write(
            dir.path().join(name),
            "not json\n{\"type\":\"footer\",\"endTime\":1,\"status\":\"STOPPED\"}\n",
        )
        .unwrap();
        assert_eq!(read_session(dir.path(), name).unwrap().len(), 1);
        assert!(matches!(
            read_session(dir.path(), "../etc/passwd"),
            Err(StorageError::InvalidName(_))
        ));
        assert!(matches!(
            delete_session(dir.path(), "session_log_missing_1.log"),
            Err(StorageError::NotFound(_))
        ));
    }
}
