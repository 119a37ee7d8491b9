use crate::domain::models::{
    BestEffort, DiagnosticEntry, DiagnosticLevel, ProgressState, SessionParameters, SessionRecord,
};
use crate::domain::validation::{DiagnosticSink, InputValidator, ValidationLimits};
use crate::infrastructure::error::TimerError;
use chrono::Local;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Durable session log, single-slot progress record and diagnostic log.
///
/// Reads never fail: an unreadable medium degrades to an empty result. Writes of session
/// records surface `TimerError::StoreUnavailable`. Progress and diagnostic writes are best
/// effort and report a swallowed failure instead of an error.
pub trait SessionStore: DiagnosticSink {
    fn append_session(&self, parameters: &SessionParameters) -> Result<SessionRecord, TimerError>;
    fn save_progress(&self, state: &ProgressState) -> BestEffort;
    fn clear_progress(&self) -> Result<(), TimerError>;
    fn load_progress(&self) -> Option<ProgressState>;
    /// Most recently created first.
    fn list_sessions(&self) -> Vec<SessionRecord>;
    /// Most recent first, at most `limit` entries.
    fn list_diagnostics(&self, limit: usize) -> Vec<DiagnosticEntry>;
}

/// Validates `parameters` and stamps a fresh identifier and today's date.
pub(crate) fn prepare_record(
    limits: &ValidationLimits,
    sink: &dyn DiagnosticSink,
    parameters: &SessionParameters,
) -> Result<SessionRecord, TimerError> {
    let validated = InputValidator::new(limits, sink).validate_parameters(parameters)?;
    Ok(SessionRecord {
        id: Uuid::new_v4().to_string(),
        subject: validated.subject,
        repetitions: validated.repetitions,
        minutes: validated.minutes,
        date: Local::now().date_naive(),
    })
}

/// Mirrors a diagnostic onto the console log.
pub(crate) fn trace_diagnostic(level: DiagnosticLevel, message: &str) {
    match level {
        DiagnosticLevel::Info => tracing::info!(target: "study_timer::diagnostics", "{message}"),
        DiagnosticLevel::Warning => tracing::warn!(target: "study_timer::diagnostics", "{message}"),
        DiagnosticLevel::Error => tracing::error!(target: "study_timer::diagnostics", "{message}"),
    }
}

/// Side channel for failures that must not reach the caller.
pub(crate) fn report_swallowed(context: &str, error: &dyn std::fmt::Display) -> BestEffort {
    tracing::error!(target: "study_timer::store", "{context}: {error}");
    BestEffort::Swallowed(format!("{context}: {error}"))
}

#[derive(Debug, Default)]
struct InMemoryState {
    sessions: Vec<SessionRecord>,
    progress: Option<ProgressState>,
    diagnostics: Vec<DiagnosticEntry>,
}

#[derive(Debug)]
pub struct InMemorySessionStore {
    limits: ValidationLimits,
    state: Mutex<InMemoryState>,
}

impl InMemorySessionStore {
    pub fn new(limits: ValidationLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(InMemoryState::default()),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, InMemoryState>, TimerError> {
        self.state
            .lock()
            .map_err(|error| TimerError::store_unavailable("in-memory store lock poisoned", error))
    }
}

impl DiagnosticSink for InMemorySessionStore {
    fn record_diagnostic(&self, level: DiagnosticLevel, message: &str) -> BestEffort {
        trace_diagnostic(level, message);
        match self.lock_state() {
            Ok(mut state) => {
                state.diagnostics.push(DiagnosticEntry::now(level, message));
                BestEffort::Written
            }
            Err(error) => report_swallowed("record diagnostic", &error),
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn append_session(&self, parameters: &SessionParameters) -> Result<SessionRecord, TimerError> {
        let record = prepare_record(&self.limits, self, parameters)?;
        self.lock_state()?.sessions.push(record.clone());
        Ok(record)
    }

    fn save_progress(&self, state: &ProgressState) -> BestEffort {
        match self.lock_state() {
            Ok(mut guard) => {
                guard.progress = Some(state.clone());
                BestEffort::Written
            }
            Err(error) => report_swallowed("save progress", &error),
        }
    }

    fn clear_progress(&self) -> Result<(), TimerError> {
        self.lock_state()?.progress = None;
        Ok(())
    }

    fn load_progress(&self) -> Option<ProgressState> {
        self.lock_state().ok().and_then(|state| state.progress.clone())
    }

    fn list_sessions(&self) -> Vec<SessionRecord> {
        self.lock_state()
            .map(|state| state.sessions.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    fn list_diagnostics(&self, limit: usize) -> Vec<DiagnosticEntry> {
        self.lock_state()
            .map(|state| state.diagnostics.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}
