use crate::domain::validation::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("session store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl TimerError {
    /// Input errors the front-end recovers from by substituting defaults.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn store_unavailable(context: &str, error: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(format!("{context}: {error}"))
    }
}
