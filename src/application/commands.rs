use crate::application::bootstrap::{bootstrap_workspace, open_session_store};
use crate::application::queries::{RecoverySnapshot, SessionQueries};
use crate::application::runner::{RunReport, SessionRunner, Ticker};
use crate::domain::models::{
    DiagnosticEntry, ProgressState, SessionParameters, SessionRecord,
};
use crate::domain::validation::{InputValidator, ParsedRequest};
use crate::infrastructure::config::{AppConfig, StorageBackend};
use crate::infrastructure::error::TimerError;
use crate::infrastructure::json_session_store::JsonFileSessionStore;
use crate::infrastructure::session_store::SessionStore;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub const SELF_TEST_SESSIONS_FILE: &str = "test_logfile.json";
pub const COMMAND_LOG_FILE: &str = "commands.log";

pub struct AppState {
    workspace_root: PathBuf,
    state_dir: PathBuf,
    logs_dir: PathBuf,
    config: Arc<AppConfig>,
    store: Arc<dyn SessionStore>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf, storage: Option<StorageBackend>) -> Result<Self, TimerError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config = match storage {
            Some(storage) => bootstrap.config.with_storage(storage),
            None => bootstrap.config,
        };
        let store = open_session_store(&config, &bootstrap.state_dir)?;

        Ok(Self {
            workspace_root: bootstrap.workspace_root,
            state_dir: bootstrap.state_dir,
            logs_dir: bootstrap.logs_dir,
            config: Arc::new(config),
            store,
            log_guard: Mutex::new(()),
        })
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn queries(&self) -> SessionQueries {
        SessionQueries::new(Arc::clone(&self.store))
    }

    pub fn runner(&self, ticker: Arc<dyn Ticker>) -> SessionRunner {
        SessionRunner::new(Arc::clone(&self.store), ticker, Arc::clone(&self.config))
    }

    pub fn command_error(&self, command: &str, error: &TimerError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    /// Appends one JSON line to `logs/commands.log`; failures only reach the console log.
    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            tracing::warn!(target: "study_timer::commands", "command log lock poisoned");
            return;
        };
        let path = self.logs_dir.join(COMMAND_LOG_FILE);
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| writeln!(file, "{payload}"));
        if let Err(error) = written {
            tracing::warn!(
                target: "study_timer::commands",
                "failed to append to {}: {error}",
                path.display()
            );
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SelfTestResponse {
    pub sessions_path: String,
    pub record: SessionRecord,
}

/// Validates a positional `REPS MINUTES SUBJECT` triple without substituting defaults.
pub fn parse_arguments_impl(
    state: &AppState,
    repetitions: &str,
    minutes: &str,
    subject: &str,
) -> Result<SessionParameters, TimerError> {
    let limits = state.config.limits();
    let validator = InputValidator::new(&limits, state.store.as_ref());
    Ok(SessionParameters {
        repetitions: validator.validate_count(repetitions, limits.max_repetitions, "Repetitions")?,
        minutes: validator.validate_count(minutes, limits.max_minutes, "Minutes")?,
        subject: validator.sanitize_subject(subject),
    })
}

/// Interprets a prompt line, degrading to the configured defaults on any invalid input.
pub fn parse_prompt_impl(state: &AppState, line: &str) -> ParsedRequest {
    let limits = state.config.limits();
    let request = InputValidator::new(&limits, state.store.as_ref()).request_or_defaults(line);
    if let ParsedRequest::Defaulted { reason, .. } = &request {
        state.log_info("parse_prompt", &format!("defaults applied: {reason}"));
    }
    request
}

pub async fn start_session_impl(
    state: &AppState,
    parameters: SessionParameters,
    ticker: Arc<dyn Ticker>,
    cancel: &CancellationToken,
) -> Result<RunReport, TimerError> {
    let report = state
        .runner(ticker)
        .run_normal(&parameters, state.config.break_minutes, cancel)
        .await?;
    state.log_info(
        "start_session",
        &format!(
            "state={:?} repetitions={} minutes={} subject={}",
            report.state,
            report.parameters.repetitions,
            report.parameters.minutes,
            report.parameters.subject
        ),
    );
    Ok(report)
}

pub async fn start_pomodoro_impl(
    state: &AppState,
    ticker: Arc<dyn Ticker>,
    cancel: &CancellationToken,
) -> Result<RunReport, TimerError> {
    let report = state.runner(ticker).run_pomodoro(cancel).await?;
    state.log_info(
        "start_pomodoro",
        &format!("sessions={}", report.parameters.repetitions),
    );
    Ok(report)
}

pub fn list_sessions_impl(state: &AppState, limit: Option<usize>) -> Vec<SessionRecord> {
    state.queries().list_sessions(limit)
}

pub fn list_diagnostics_impl(state: &AppState, limit: usize) -> Vec<DiagnosticEntry> {
    state.queries().list_diagnostics(limit)
}

pub fn get_progress_impl(state: &AppState) -> Option<ProgressState> {
    state.queries().read_progress()
}

pub fn recovery_snapshot_impl(state: &AppState) -> RecoverySnapshot {
    state.queries().recovery_snapshot()
}

pub fn clear_progress_impl(state: &AppState) -> Result<(), TimerError> {
    state.store.clear_progress()?;
    state.log_info("clear_progress", "progress slot cleared");
    Ok(())
}

/// Writes a `(2, 2, "test")` session into a scratch flat-file log and reads it back.
pub fn self_test_impl(state: &AppState) -> Result<SelfTestResponse, TimerError> {
    let store = JsonFileSessionStore::open(
        &state.state_dir,
        state.config.limits(),
        state.config.max_file_size_bytes,
    )?
    .with_sessions_file(SELF_TEST_SESSIONS_FILE)?;

    match fs::remove_file(store.sessions_path()) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(TimerError::store_unavailable("reset self-test log", error)),
    }

    let record = store.append_session(&SessionParameters::new(2, 2, "test"))?;
    if !store.list_sessions().contains(&record) {
        return Err(TimerError::StoreUnavailable(format!(
            "self-test record {} was not read back",
            record.id
        )));
    }

    let sessions_path = store.sessions_path().display().to_string();
    state.log_info("self_test", &format!("wrote {sessions_path}"));
    Ok(SelfTestResponse {
        sessions_path,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::bootstrap::DATABASE_FILE;
    use crate::application::runner::{RunnerState, WaitOutcome};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TempWorkspace {
        dir: TempDir,
    }

    impl TempWorkspace {
        fn new() -> Self {
            Self {
                dir: TempDir::new().expect("create temp workspace"),
            }
        }

        fn app_state(&self) -> AppState {
            AppState::new(self.dir.path().to_path_buf(), None).expect("initialize app state")
        }

        fn json_app_state(&self) -> AppState {
            AppState::new(self.dir.path().to_path_buf(), Some(StorageBackend::Json))
                .expect("initialize json app state")
        }
    }

    struct InstantTicker;

    #[async_trait]
    impl Ticker for InstantTicker {
        async fn wait(&self, _duration: Duration, cancel: &CancellationToken) -> WaitOutcome {
            if cancel.is_cancelled() {
                WaitOutcome::Cancelled
            } else {
                WaitOutcome::Elapsed
            }
        }
    }

    #[test]
    fn parse_arguments_rejects_invalid_triples() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let parsed = parse_arguments_impl(&state, "3", "30", "Math!").expect("valid arguments");
        assert_eq!(parsed, SessionParameters::new(3, 30, "Math"));

        let error = parse_arguments_impl(&state, "3", "481", "Math").expect_err("too long");
        assert!(error.is_validation());
        let error = parse_arguments_impl(&state, "three", "30", "Math").expect_err("not a number");
        assert!(error.is_validation());
    }

    #[test]
    fn parse_prompt_applies_defaults_for_bad_lines() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let request = parse_prompt_impl(&state, "abc");
        assert!(request.is_defaulted());
        assert_eq!(request.parameters(), &SessionParameters::new(3, 30, "Unspecified"));

        let request = parse_prompt_impl(&state, "2,45,Physics");
        assert_eq!(request, ParsedRequest::Parsed(SessionParameters::new(2, 45, "Physics")));
    }

    #[tokio::test]
    async fn start_session_persists_record_and_clears_progress() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let cancel = CancellationToken::new();

        let report = start_session_impl(
            &state,
            SessionParameters::new(2, 3, "Math"),
            Arc::new(InstantTicker),
            &cancel,
        )
        .await
        .expect("run session");

        assert_eq!(report.state, RunnerState::Completed);
        let sessions = list_sessions_impl(&state, None);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].parameters(), SessionParameters::new(2, 3, "Math"));
        assert_eq!(get_progress_impl(&state), None);
        assert!(workspace.dir.path().join("logs").join("commands.log").is_file());
    }

    #[tokio::test]
    async fn cancelled_pomodoro_without_sessions_records_nothing() {
        let workspace = TempWorkspace::new();
        let state = workspace.json_app_state();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = start_pomodoro_impl(&state, Arc::new(InstantTicker), &cancel)
            .await
            .expect("run pomodoro");

        assert_eq!(report.record, None);
        assert_eq!(report.parameters.repetitions, 0);
        assert!(list_sessions_impl(&state, None).is_empty());
        assert!(!list_diagnostics_impl(&state, 10).is_empty());
    }

    #[tokio::test]
    async fn corrupt_database_keeps_read_commands_working() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        state
            .store
            .append_session(&SessionParameters::new(3, 30, "Math"))
            .expect("append session");
        drop(state);

        let db_path = workspace.dir.path().join("state").join(DATABASE_FILE);
        fs::write(&db_path, "not a sqlite database ".repeat(512)).expect("corrupt database");

        let state = workspace.app_state();
        assert!(list_sessions_impl(&state, None).is_empty());
        assert_eq!(get_progress_impl(&state), None);
        assert!(list_diagnostics_impl(&state, 10).is_empty());

        let error = start_session_impl(
            &state,
            SessionParameters::new(1, 1, "Math"),
            Arc::new(InstantTicker),
            &CancellationToken::new(),
        )
        .await
        .expect_err("writes to a corrupt database must fail");
        assert!(matches!(error, TimerError::StoreUnavailable(_)));
    }

    #[test]
    fn progress_commands_read_and_clear_the_slot() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        state.store.save_progress(&ProgressState::new("Math", 2, 12));

        assert_eq!(get_progress_impl(&state), Some(ProgressState::new("Math", 2, 12)));
        assert_eq!(
            recovery_snapshot_impl(&state).interrupted,
            Some(ProgressState::new("Math", 2, 12))
        );

        clear_progress_impl(&state).expect("clear progress");
        assert_eq!(get_progress_impl(&state), None);
    }

    #[test]
    fn self_test_overwrites_scratch_log_each_run() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let first = self_test_impl(&state).expect("first self test");
        let second = self_test_impl(&state).expect("second self test");
        assert!(second.sessions_path.ends_with(SELF_TEST_SESSIONS_FILE));
        assert_eq!(second.record.parameters(), SessionParameters::new(2, 2, "test"));
        assert_ne!(first.record.id, second.record.id);

        let raw = fs::read_to_string(&second.sessions_path).expect("read scratch log");
        let document: serde_json::Value = serde_json::from_str(&raw).expect("parse scratch log");
        assert_eq!(document.as_object().map(|entries| entries.len()), Some(1));
        assert!(list_sessions_impl(&state, None).is_empty());
    }

    #[test]
    fn command_log_failure_does_not_disturb_the_command() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let logs_dir = workspace.dir.path().join("logs");
        fs::remove_dir_all(&logs_dir).expect("remove logs dir");
        fs::write(&logs_dir, "not a directory").expect("block logs dir");

        clear_progress_impl(&state).expect("clear progress still succeeds");
        let message = state.command_error(
            "self_test",
            &TimerError::StoreUnavailable("disk full".to_string()),
        );
        assert!(message.contains("disk full"));
    }

    #[test]
    fn command_error_is_written_to_command_log() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let message = state.command_error(
            "start_session",
            &TimerError::StoreUnavailable("disk full".to_string()),
        );
        assert!(message.contains("disk full"));

        let log = fs::read_to_string(workspace.dir.path().join("logs").join("commands.log"))
            .expect("read command log");
        assert!(log.contains("\"command\":\"start_session\""));
    }
}
