use crate::domain::validation::ValidationLimits;
use crate::infrastructure::error::TimerError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

const APP_JSON: &str = "app.json";
const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Sqlite,
    Json,
}

impl FromStr for StorageBackend {
    type Err = TimerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "json" => Ok(Self::Json),
            other => Err(TimerError::InvalidConfig(format!(
                "unsupported storage backend: {other}"
            ))),
        }
    }
}

/// Immutable application settings, built once at startup and shared by every component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub schema: u8,
    pub storage: StorageBackend,
    pub max_repetitions: u32,
    pub max_minutes: u32,
    pub max_subject_length: usize,
    pub max_file_size_bytes: u64,
    pub default_repetitions: u32,
    pub default_minutes: u32,
    pub default_subject: String,
    pub break_minutes: u32,
    pub pomodoro_work_minutes: u32,
    pub pomodoro_break_minutes: u32,
    pub tick_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema: SCHEMA_VERSION as u8,
            storage: StorageBackend::Sqlite,
            max_repetitions: 100,
            max_minutes: 480,
            max_subject_length: 100,
            max_file_size_bytes: 10_000_000,
            default_repetitions: 3,
            default_minutes: 30,
            default_subject: "Unspecified".to_string(),
            break_minutes: 5,
            pomodoro_work_minutes: 25,
            pomodoro_break_minutes: 5,
            tick_seconds: 60,
        }
    }
}

impl AppConfig {
    pub fn with_storage(mut self, storage: StorageBackend) -> Self {
        self.storage = storage;
        self
    }

    pub fn limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_repetitions: self.max_repetitions,
            max_minutes: self.max_minutes,
            max_subject_length: self.max_subject_length,
            default_repetitions: self.default_repetitions,
            default_minutes: self.default_minutes,
            default_subject: self.default_subject.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), TimerError> {
        if self.max_repetitions == 0 || self.max_minutes == 0 || self.max_subject_length == 0 {
            return Err(TimerError::InvalidConfig(
                "maxRepetitions, maxMinutes and maxSubjectLength must be > 0".to_string(),
            ));
        }
        if self.tick_seconds == 0 {
            return Err(TimerError::InvalidConfig(
                "tickSeconds must be > 0".to_string(),
            ));
        }
        for (field, value, min) in [
            ("breakMinutes", self.break_minutes, 1),
            ("pomodoroWorkMinutes", self.pomodoro_work_minutes, 1),
            ("pomodoroBreakMinutes", self.pomodoro_break_minutes, 0),
        ] {
            if value < min || value > self.max_minutes {
                return Err(TimerError::InvalidConfig(format!(
                    "{field} must be between {min} and {} (got {value})",
                    self.max_minutes
                )));
            }
        }
        if self.default_subject.trim().is_empty() {
            return Err(TimerError::InvalidConfig(
                "defaultSubject must not be empty".to_string(),
            ));
        }
        if self.default_repetitions == 0
            || self.default_repetitions > self.max_repetitions
            || self.default_minutes == 0
            || self.default_minutes > self.max_minutes
        {
            return Err(TimerError::InvalidConfig(
                "default session parameters must be within limits".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), TimerError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&AppConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

pub fn load_config(config_dir: &Path) -> Result<AppConfig, TimerError> {
    let path = config_dir.join(APP_JSON);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| TimerError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(TimerError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let config: AppConfig = serde_json::from_value(parsed)?;
    config.validate()?;
    Ok(config)
}
