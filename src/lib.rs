pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::commands::AppState;
pub use application::queries::{RecoverySnapshot, SessionQueries};
pub use application::runner::{RunReport, RunnerState, SessionRunner, Ticker, TokioTicker};
pub use domain::models::{
    BestEffort, DiagnosticEntry, DiagnosticLevel, ProgressState, SessionMode, SessionParameters,
    SessionRecord,
};
pub use domain::validation::{InputValidator, ParsedRequest, ValidationError, ValidationLimits};
pub use infrastructure::config::{AppConfig, StorageBackend};
pub use infrastructure::error::TimerError;
pub use infrastructure::json_session_store::JsonFileSessionStore;
pub use infrastructure::session_store::{InMemorySessionStore, SessionStore};
pub use infrastructure::sqlite_session_store::SqliteSessionStore;
