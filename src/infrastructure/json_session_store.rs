use crate::domain::models::{
    BestEffort, DiagnosticEntry, DiagnosticLevel, ProgressState, SessionEntry, SessionParameters,
    SessionRecord,
};
use crate::domain::validation::{DiagnosticSink, ValidationLimits};
use crate::infrastructure::error::TimerError;
use crate::infrastructure::session_store::{
    prepare_record, report_swallowed, trace_diagnostic, SessionStore,
};
use serde_json::{Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

pub const SESSIONS_FILE: &str = "logfile.json";
pub const PROGRESS_FILE: &str = "progress.json";
pub const DIAGNOSTICS_FILE: &str = "diagnostics.jsonl";
const PROGRESS_KEY: &str = "1";
const CORRUPT_SUFFIX: &str = "corrupt";
const DIAGNOSTIC_BACKUPS: usize = 3;

enum Document {
    Missing,
    Loaded(Map<String, Value>),
    Oversized(u64),
    Corrupt(String),
    Unreadable(String),
}

/// Flat-file backing: one JSON object per store file, all confined to a single directory.
#[derive(Debug)]
pub struct JsonFileSessionStore {
    base_dir: PathBuf,
    sessions_path: PathBuf,
    progress_path: PathBuf,
    diagnostics_path: PathBuf,
    limits: ValidationLimits,
    max_file_size_bytes: u64,
    sessions_guard: Mutex<()>,
    progress_guard: Mutex<()>,
    diagnostics_guard: Mutex<()>,
}

impl JsonFileSessionStore {
    pub fn open(
        base_dir: impl AsRef<Path>,
        limits: ValidationLimits,
        max_file_size_bytes: u64,
    ) -> Result<Self, TimerError> {
        fs::create_dir_all(base_dir.as_ref())?;
        let base_dir = base_dir.as_ref().canonicalize()?;
        Ok(Self {
            sessions_path: base_dir.join(SESSIONS_FILE),
            progress_path: base_dir.join(PROGRESS_FILE),
            diagnostics_path: base_dir.join(DIAGNOSTICS_FILE),
            base_dir,
            limits,
            max_file_size_bytes,
            sessions_guard: Mutex::new(()),
            progress_guard: Mutex::new(()),
            diagnostics_guard: Mutex::new(()),
        })
    }

    /// Points the session log at another file inside the store directory.
    pub fn with_sessions_file(mut self, path: impl AsRef<Path>) -> Result<Self, TimerError> {
        self.sessions_path = self.validate_file_path(path.as_ref())?;
        Ok(self)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn sessions_path(&self) -> &Path {
        &self.sessions_path
    }

    /// Accepts only files whose parent directory is the store directory.
    pub fn validate_file_path(&self, path: &Path) -> Result<PathBuf, TimerError> {
        let candidate = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        };
        let invalid = || {
            TimerError::StoreUnavailable(format!("invalid file path: {}", path.display()))
        };
        let file_name = candidate.file_name().ok_or_else(invalid)?;
        let parent = candidate
            .parent()
            .and_then(|parent| parent.canonicalize().ok())
            .ok_or_else(invalid)?;
        if parent != self.base_dir {
            return Err(invalid());
        }
        Ok(parent.join(file_name))
    }

    fn read_document(&self, path: &Path) -> Document {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Document::Missing,
            Err(error) => return Document::Unreadable(error.to_string()),
        };
        if metadata.len() > self.max_file_size_bytes {
            return Document::Oversized(metadata.len());
        }
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => return Document::Unreadable(error.to_string()),
        };
        if raw.trim().is_empty() {
            return Document::Missing;
        }
        match serde_json::from_str::<Map<String, Value>>(&raw) {
            Ok(map) => Document::Loaded(map),
            Err(error) => Document::Corrupt(error.to_string()),
        }
    }

    /// Read path: any problem with the medium degrades to an empty document.
    fn load_or_empty(&self, path: &Path) -> Map<String, Value> {
        match self.read_document(path) {
            Document::Missing => Map::new(),
            Document::Loaded(map) => map,
            Document::Oversized(size) => {
                report_swallowed(
                    "read store file",
                    &format!("{} exceeds size limit ({size} bytes)", path.display()),
                );
                Map::new()
            }
            Document::Corrupt(reason) | Document::Unreadable(reason) => {
                report_swallowed("read store file", &format!("{}: {reason}", path.display()));
                Map::new()
            }
        }
    }

    /// Write path: oversized or unreadable files are never overwritten; corrupt ones are
    /// moved aside so a fresh document can replace them.
    fn load_for_update(&self, path: &Path) -> Result<Map<String, Value>, TimerError> {
        match self.read_document(path) {
            Document::Missing => Ok(Map::new()),
            Document::Loaded(map) => Ok(map),
            Document::Oversized(size) => Err(TimerError::StoreUnavailable(format!(
                "{} exceeds size limit ({size} > {} bytes)",
                path.display(),
                self.max_file_size_bytes
            ))),
            Document::Unreadable(reason) => Err(TimerError::StoreUnavailable(format!(
                "{} is unreadable: {reason}",
                path.display()
            ))),
            Document::Corrupt(reason) => {
                let quarantine = quarantine_path(path);
                fs::rename(path, &quarantine)
                    .map_err(|error| TimerError::store_unavailable("quarantine corrupt file", error))?;
                self.record_diagnostic(
                    DiagnosticLevel::Warning,
                    &format!(
                        "discarded corrupt store file {} ({reason}); moved to {}",
                        path.display(),
                        quarantine.display()
                    ),
                );
                Ok(Map::new())
            }
        }
    }

    fn lock<'a>(guard: &'a Mutex<()>, context: &str) -> Result<MutexGuard<'a, ()>, TimerError> {
        guard
            .lock()
            .map_err(|error| TimerError::store_unavailable(context, error))
    }
}

fn quarantine_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{CORRUPT_SUFFIX}"));
    path.with_file_name(name)
}

/// Writes `value` to a sibling temp file, syncs it and renames it over `path`.
fn write_atomically(path: &Path, value: &Value) -> Result<(), TimerError> {
    let parent = path
        .parent()
        .ok_or_else(|| TimerError::StoreUnavailable(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| TimerError::StoreUnavailable(format!("{} has no file name", path.display())))?;
    let tmp_path = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));

    let result = (|| -> Result<(), TimerError> {
        let formatted = serde_json::to_string_pretty(value)?;
        let mut file = File::create(&tmp_path)?;
        file.write_all(formatted.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        drop(file);
        restrict_permissions(&tmp_path)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map_err(|error| TimerError::store_unavailable("write store file", error))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl DiagnosticSink for JsonFileSessionStore {
    fn record_diagnostic(&self, level: DiagnosticLevel, message: &str) -> BestEffort {
        trace_diagnostic(level, message);
        let result = (|| -> Result<(), TimerError> {
            let _guard = Self::lock(&self.diagnostics_guard, "diagnostics lock poisoned")?;
            let line = format!("{}\n", serde_json::to_string(&DiagnosticEntry::now(level, message))?);
            self.rotate_diagnostics_for(line.len() as u64)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.diagnostics_path)?;
            file.write_all(line.as_bytes())?;
            Ok(())
        })();
        match result {
            Ok(()) => BestEffort::Written,
            Err(error) => report_swallowed("record diagnostic", &error),
        }
    }
}

impl JsonFileSessionStore {
    /// Shifts `diagnostics.jsonl` to `.1` (and older backups up to `.3`) when appending
    /// `incoming` bytes would push it past the size cap.
    fn rotate_diagnostics_for(&self, incoming: u64) -> io::Result<()> {
        let current = match fs::metadata(&self.diagnostics_path) {
            Ok(metadata) => metadata.len(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(error) => return Err(error),
        };
        if current == 0 || current + incoming <= self.max_file_size_bytes {
            return Ok(());
        }

        for generation in (1..DIAGNOSTIC_BACKUPS).rev() {
            let from = self.diagnostics_backup(generation);
            if from.exists() {
                fs::rename(&from, self.diagnostics_backup(generation + 1))?;
            }
        }
        fs::rename(&self.diagnostics_path, self.diagnostics_backup(1))
    }

    fn diagnostics_backup(&self, generation: usize) -> PathBuf {
        self.diagnostics_path
            .with_file_name(format!("{DIAGNOSTICS_FILE}.{generation}"))
    }

    /// Entries of one diagnostics file, newest first. Unreadable or oversized files yield none.
    fn read_diagnostics(&self, path: &Path) -> Vec<DiagnosticEntry> {
        let raw = match fs::metadata(path) {
            Ok(metadata) if metadata.len() > self.max_file_size_bytes => {
                report_swallowed(
                    "read diagnostics",
                    &format!("{} exceeds size limit", path.display()),
                );
                return Vec::new();
            }
            Ok(_) => match fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(error) => {
                    report_swallowed("read diagnostics", &error);
                    return Vec::new();
                }
            },
            Err(_) => return Vec::new(),
        };

        raw.lines()
            .rev()
            .filter_map(|line| serde_json::from_str::<DiagnosticEntry>(line).ok())
            .collect()
    }
}

impl SessionStore for JsonFileSessionStore {
    fn append_session(&self, parameters: &SessionParameters) -> Result<SessionRecord, TimerError> {
        let record = prepare_record(&self.limits, self, parameters)?;
        let _guard = Self::lock(&self.sessions_guard, "session log lock poisoned")?;

        let mut sessions = self.load_for_update(&self.sessions_path)?;
        let entry = serde_json::to_value(SessionEntry::from(&record))
            .map_err(|error| TimerError::store_unavailable("serialize session", error))?;
        sessions.insert(record.id.clone(), entry);
        write_atomically(&self.sessions_path, &Value::Object(sessions))?;
        Ok(record)
    }

    fn save_progress(&self, state: &ProgressState) -> BestEffort {
        let result = (|| -> Result<(), TimerError> {
            let _guard = Self::lock(&self.progress_guard, "progress lock poisoned")?;
            let mut slot = Map::new();
            slot.insert(PROGRESS_KEY.to_string(), serde_json::to_value(state)?);
            write_atomically(&self.progress_path, &Value::Object(slot))
        })();
        match result {
            Ok(()) => BestEffort::Written,
            Err(error) => report_swallowed("save progress", &error),
        }
    }

    fn clear_progress(&self) -> Result<(), TimerError> {
        let _guard = Self::lock(&self.progress_guard, "progress lock poisoned")?;
        match fs::remove_file(&self.progress_path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(TimerError::store_unavailable("clear progress", error)),
        }
    }

    fn load_progress(&self) -> Option<ProgressState> {
        let mut slot = self.load_or_empty(&self.progress_path);
        let value = slot.remove(PROGRESS_KEY)?;
        match serde_json::from_value::<ProgressState>(value) {
            Ok(state) => Some(state),
            Err(error) => {
                report_swallowed("load progress", &error);
                None
            }
        }
    }

    fn list_sessions(&self) -> Vec<SessionRecord> {
        let sessions = self.load_or_empty(&self.sessions_path);
        let mut records = sessions
            .into_iter()
            .filter_map(|(id, value)| {
                serde_json::from_value::<SessionEntry>(value)
                    .ok()
                    .map(|entry| entry.into_record(id))
            })
            .collect::<Vec<_>>();
        records.reverse();
        records
    }

    fn list_diagnostics(&self, limit: usize) -> Vec<DiagnosticEntry> {
        let mut entries = self.read_diagnostics(&self.diagnostics_path);
        for generation in 1..=DIAGNOSTIC_BACKUPS {
            if entries.len() >= limit {
                break;
            }
            entries.extend(self.read_diagnostics(&self.diagnostics_backup(generation)));
        }
        entries.truncate(limit);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::AppConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir, max_file_size_bytes: u64) -> JsonFileSessionStore {
        JsonFileSessionStore::open(dir.path(), AppConfig::default().limits(), max_file_size_bytes)
            .expect("open json store")
    }

    #[test]
    fn append_writes_id_keyed_document() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 10_000_000);

        let record = store
            .append_session(&SessionParameters::new(3, 30, "Math"))
            .expect("append session");

        let raw = fs::read_to_string(dir.path().join(SESSIONS_FILE)).expect("read log");
        let document: Value = serde_json::from_str(&raw).expect("parse log");
        assert_eq!(
            document[&record.id],
            serde_json::json!({
                "name": "Math",
                "repetitions": 3,
                "minutes": 30,
                "date": record.date.to_string()
            })
        );
    }

    #[test]
    fn list_sessions_returns_newest_first_with_unique_ids() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 10_000_000);
        let ids = (1..=3)
            .map(|minutes| {
                store
                    .append_session(&SessionParameters::new(1, minutes, "Reading"))
                    .expect("append")
                    .id
            })
            .collect::<Vec<_>>();

        let listed = store.list_sessions();
        assert_eq!(
            listed.iter().map(|record| record.id.clone()).collect::<Vec<_>>(),
            ids.into_iter().rev().collect::<Vec<_>>()
        );
        assert_eq!(listed[0].minutes, 3);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 10_000_000);
        assert!(store.list_sessions().is_empty());
        assert!(store.list_diagnostics(5).is_empty());
        assert_eq!(store.load_progress(), None);
    }

    #[test]
    fn oversized_file_reads_as_empty_and_refuses_writes() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 64);
        let padding = "x".repeat(128);
        let oversized = format!(
            r#"{{"a": {{"name": "{padding}", "repetitions": 1, "minutes": 1, "date": "2026-01-01"}}}}"#
        );
        fs::write(dir.path().join(SESSIONS_FILE), &oversized).expect("write oversized log");

        assert!(store.list_sessions().is_empty());
        let error = store
            .append_session(&SessionParameters::new(1, 1, "Math"))
            .expect_err("oversized log must not be overwritten");
        assert!(matches!(error, TimerError::StoreUnavailable(_)));
        assert_eq!(
            fs::read_to_string(dir.path().join(SESSIONS_FILE)).expect("read log"),
            oversized
        );
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_quarantined_on_write() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 10_000_000);
        fs::write(dir.path().join(SESSIONS_FILE), "{not json").expect("write corrupt log");

        assert!(store.list_sessions().is_empty());
        let record = store
            .append_session(&SessionParameters::new(2, 25, "Chemistry"))
            .expect("append after corruption");

        assert_eq!(store.list_sessions(), vec![record]);
        assert_eq!(
            fs::read_to_string(dir.path().join(format!("{SESSIONS_FILE}.corrupt")))
                .expect("quarantined copy"),
            "{not json"
        );
        assert!(store
            .list_diagnostics(10)
            .iter()
            .any(|entry| entry.level == DiagnosticLevel::Warning && entry.message.contains("corrupt")));
    }

    #[test]
    fn paths_outside_the_store_directory_are_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let other = TempDir::new().expect("other dir");
        let store = open_store(&dir, 10_000_000);

        assert!(store.validate_file_path(Path::new("test_logfile.json")).is_ok());
        assert!(store.validate_file_path(&other.path().join("logfile.json")).is_err());
        assert!(store.validate_file_path(Path::new("../logfile.json")).is_err());
        assert!(store.validate_file_path(Path::new("..")).is_err());
    }

    #[test]
    fn progress_slot_roundtrip_and_idempotent_clear() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 10_000_000);
        assert!(store.save_progress(&ProgressState::new("Math", 2, 10)).is_written());
        assert!(store.save_progress(&ProgressState::new("Math", 2, 9)).is_written());

        let raw = fs::read_to_string(dir.path().join(PROGRESS_FILE)).expect("read slot");
        let document: Value = serde_json::from_str(&raw).expect("parse slot");
        assert_eq!(document["1"]["minutes_remaining"], 9);

        let reopened = open_store(&dir, 10_000_000);
        assert_eq!(reopened.load_progress(), Some(ProgressState::new("Math", 2, 9)));
        reopened.clear_progress().expect("clear");
        reopened.clear_progress().expect("clear twice");
        assert_eq!(reopened.load_progress(), None);
    }

    #[test]
    fn diagnostics_skip_garbage_lines() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 10_000_000);
        store.record_diagnostic(DiagnosticLevel::Info, "first");
        fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join(DIAGNOSTICS_FILE))
            .and_then(|mut file| writeln!(file, "garbage"))
            .expect("append garbage");
        store.record_diagnostic(DiagnosticLevel::Error, "second");

        let entries = store.list_diagnostics(10);
        assert_eq!(
            entries.iter().map(|entry| entry.message.as_str()).collect::<Vec<_>>(),
            vec!["second", "first"]
        );
    }

    #[test]
    fn diagnostics_rotate_at_the_size_cap_and_stay_queryable() {
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 512);
        for index in 0..20 {
            assert!(store
                .record_diagnostic(DiagnosticLevel::Info, &format!("event {index}"))
                .is_written());
        }

        let current = fs::metadata(dir.path().join(DIAGNOSTICS_FILE)).expect("current log");
        assert!(current.len() <= 512);
        assert!(dir.path().join(format!("{DIAGNOSTICS_FILE}.1")).is_file());
        assert!(!dir.path().join(format!("{DIAGNOSTICS_FILE}.4")).exists());

        let recent = store.list_diagnostics(5);
        assert_eq!(
            recent.iter().map(|entry| entry.message.as_str()).collect::<Vec<_>>(),
            vec!["event 19", "event 18", "event 17", "event 16", "event 15"]
        );
    }

    #[test]
    fn concurrent_appends_do_not_lose_records() {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(open_store(&dir, 10_000_000));
        let handles = (0..8u32)
            .map(|index| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .append_session(&SessionParameters::new(1, index + 1, "Parallel"))
                        .expect("append")
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("join writer");
        }
        assert_eq!(store.list_sessions().len(), 8);
    }

    #[cfg(unix)]
    #[test]
    fn session_log_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().expect("temp dir");
        let store = open_store(&dir, 10_000_000);
        store
            .append_session(&SessionParameters::new(1, 1, "Math"))
            .expect("append");
        let mode = fs::metadata(dir.path().join(SESSIONS_FILE))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
