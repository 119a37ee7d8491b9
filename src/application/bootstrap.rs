use crate::infrastructure::config::{ensure_default_configs, load_config, AppConfig, StorageBackend};
use crate::infrastructure::error::TimerError;
use crate::infrastructure::json_session_store::JsonFileSessionStore;
use crate::infrastructure::session_store::SessionStore;
use crate::infrastructure::sqlite_session_store::SqliteSessionStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DATABASE_FILE: &str = "study_timer.sqlite";

#[derive(Debug)]
pub struct BootstrapResult {
    pub workspace_root: PathBuf,
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub config: AppConfig,
}

pub fn bootstrap_workspace(workspace_root: &Path) -> Result<BootstrapResult, TimerError> {
    let config_dir = workspace_root.join("config");
    let state_dir = workspace_root.join("state");
    let logs_dir = workspace_root.join("logs");

    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(&state_dir)?;
    fs::create_dir_all(&logs_dir)?;

    ensure_default_configs(&config_dir)?;
    let config = load_config(&config_dir)?;

    Ok(BootstrapResult {
        workspace_root: workspace_root.to_path_buf(),
        config_dir,
        state_dir,
        logs_dir,
        config,
    })
}

pub fn open_session_store(
    config: &AppConfig,
    state_dir: &Path,
) -> Result<Arc<dyn SessionStore>, TimerError> {
    let store: Arc<dyn SessionStore> = match config.storage {
        StorageBackend::Sqlite => Arc::new(SqliteSessionStore::open(
            state_dir.join(DATABASE_FILE),
            config.limits(),
        )),
        StorageBackend::Json => Arc::new(JsonFileSessionStore::open(
            state_dir,
            config.limits(),
            config.max_file_size_bytes,
        )?),
    };
    Ok(store)
}
