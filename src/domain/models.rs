use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const POMODORO_SUBJECT: &str = "Pomodoro";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Normal,
    Pomodoro,
}

/// Validated `(repetitions, minutes, subject)` triple handed from the validator to the runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionParameters {
    pub repetitions: u32,
    pub minutes: u32,
    pub subject: String,
}

impl SessionParameters {
    pub fn new(repetitions: u32, minutes: u32, subject: impl Into<String>) -> Self {
        Self {
            repetitions,
            minutes,
            subject: subject.into(),
        }
    }
}

/// A completed study session. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "name")]
    pub subject: String,
    pub repetitions: u32,
    pub minutes: u32,
    pub date: NaiveDate,
}

impl SessionRecord {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")?;
        validate_non_empty(&self.subject, "session.name")?;
        if self.repetitions == 0 {
            return Err("session.repetitions must be > 0".to_string());
        }
        if self.minutes == 0 {
            return Err("session.minutes must be > 0".to_string());
        }
        Ok(())
    }

    pub fn parameters(&self) -> SessionParameters {
        SessionParameters::new(self.repetitions, self.minutes, self.subject.clone())
    }
}

/// Persisted value of a session record, keyed by id in the flat-file log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntry {
    pub name: String,
    pub repetitions: u32,
    pub minutes: u32,
    pub date: NaiveDate,
}

impl SessionEntry {
    pub fn into_record(self, id: String) -> SessionRecord {
        SessionRecord {
            id,
            subject: self.name,
            repetitions: self.repetitions,
            minutes: self.minutes,
            date: self.date,
        }
    }
}

impl From<&SessionRecord> for SessionEntry {
    fn from(record: &SessionRecord) -> Self {
        Self {
            name: record.subject.clone(),
            repetitions: record.repetitions,
            minutes: record.minutes,
            date: record.date,
        }
    }
}

/// Snapshot of an in-flight session. Only the latest snapshot is ever kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProgressState {
    #[serde(rename = "name")]
    pub subject: String,
    pub repetitions_remaining: u32,
    pub minutes_remaining: u32,
}

impl ProgressState {
    pub fn new(subject: impl Into<String>, repetitions_remaining: u32, minutes_remaining: u32) -> Self {
        Self {
            subject: subject.into(),
            repetitions_remaining,
            minutes_remaining,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

impl DiagnosticLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub level: DiagnosticLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl DiagnosticEntry {
    pub fn now(level: DiagnosticLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of an operation whose failure must not abort the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    Written,
    Swallowed(String),
}

impl BestEffort {
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written)
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> SessionRecord {
        SessionRecord {
            id: "c6f0b1a2-0000-4000-8000-000000000001".to_string(),
            subject: "Math".to_string(),
            repetitions: 3,
            minutes: 30,
            date: NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
        }
    }

    #[test]
    fn record_validate_rejects_zero_counts() {
        let mut record = sample_record();
        assert!(record.validate().is_ok());
        record.repetitions = 0;
        assert!(record.validate().is_err());
    }

    #[test]
    fn session_entry_uses_flat_file_field_names() {
        let entry = SessionEntry::from(&sample_record());
        let value = serde_json::to_value(&entry).expect("serialize entry");
        assert_eq!(
            value,
            serde_json::json!({
                "name": "Math",
                "repetitions": 3,
                "minutes": 30,
                "date": "2026-02-16"
            })
        );
    }

    #[test]
    fn progress_state_serializes_subject_as_name() {
        let state = ProgressState::new("Math", 2, 14);
        let value = serde_json::to_value(&state).expect("serialize progress");
        assert_eq!(value["name"], "Math");
        assert_eq!(value["repetitions_remaining"], 2);
        assert_eq!(value["minutes_remaining"], 14);
    }

    #[test]
    fn diagnostic_level_parses_aliases() {
        assert_eq!(DiagnosticLevel::parse("WARN"), Some(DiagnosticLevel::Warning));
        assert_eq!(DiagnosticLevel::parse("error"), Some(DiagnosticLevel::Error));
        assert_eq!(DiagnosticLevel::parse("debug"), None);
    }
}
