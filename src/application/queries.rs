use crate::domain::models::{DiagnosticEntry, ProgressState, SessionRecord};
use crate::infrastructure::session_store::SessionStore;
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_DIAGNOSTIC_LIMIT: usize = 20;

/// What a restarted process finds in the store before starting a new run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoverySnapshot {
    pub interrupted: Option<ProgressState>,
    pub last_session: Option<SessionRecord>,
}

/// Read-only view over a session store. Never writes and never fails.
#[derive(Clone)]
pub struct SessionQueries {
    store: Arc<dyn SessionStore>,
}

impl SessionQueries {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Newest first; `limit` of `None` returns every record.
    pub fn list_sessions(&self, limit: Option<usize>) -> Vec<SessionRecord> {
        let sessions = self.store.list_sessions();
        match limit {
            Some(limit) => sessions.into_iter().take(limit).collect(),
            None => sessions,
        }
    }

    pub fn list_diagnostics(&self, limit: usize) -> Vec<DiagnosticEntry> {
        self.store.list_diagnostics(limit)
    }

    pub fn read_progress(&self) -> Option<ProgressState> {
        self.store.load_progress()
    }

    pub fn recovery_snapshot(&self) -> RecoverySnapshot {
        RecoverySnapshot {
            interrupted: self.read_progress(),
            last_session: self.list_sessions(Some(1)).into_iter().next(),
        }
    }
}
