use crate::domain::models::{BestEffort, DiagnosticLevel, SessionParameters};
use std::num::IntErrorKind;
use thiserror::Error;

/// Receiver for operational diagnostics. Recording never fails observably.
pub trait DiagnosticSink: Send + Sync {
    fn record_diagnostic(&self, level: DiagnosticLevel, message: &str) -> BestEffort;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("{field} must be between 1 and {max} (got {value})")]
    OutOfRange { field: String, value: i64, max: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_repetitions: u32,
    pub max_minutes: u32,
    pub max_subject_length: usize,
    pub default_repetitions: u32,
    pub default_minutes: u32,
    pub default_subject: String,
}

impl ValidationLimits {
    pub fn default_parameters(&self) -> SessionParameters {
        SessionParameters::new(
            self.default_repetitions,
            self.default_minutes,
            self.default_subject.clone(),
        )
    }
}

/// Result of the top-level request parser, which never fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRequest {
    Parsed(SessionParameters),
    Defaulted {
        parameters: SessionParameters,
        reason: ValidationError,
    },
}

impl ParsedRequest {
    pub fn parameters(&self) -> &SessionParameters {
        match self {
            Self::Parsed(parameters) | Self::Defaulted { parameters, .. } => parameters,
        }
    }

    pub fn into_parameters(self) -> SessionParameters {
        match self {
            Self::Parsed(parameters) | Self::Defaulted { parameters, .. } => parameters,
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Self::Defaulted { .. })
    }
}

pub fn is_allowed_subject_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, ' ' | '-' | '_')
}

/// Keeps `[A-Za-z0-9 \-_]`, truncates to `max_length`, trims surrounding spaces and falls
/// back to `default_subject` when nothing is left.
pub fn sanitize_subject(raw: &str, max_length: usize, default_subject: &str) -> String {
    let filtered = raw
        .chars()
        .filter(|ch| is_allowed_subject_char(*ch))
        .take(max_length)
        .collect::<String>();
    let trimmed = filtered.trim();
    if trimmed.is_empty() {
        default_subject.chars().take(max_length).collect()
    } else {
        trimmed.to_string()
    }
}

pub struct InputValidator<'a, S: DiagnosticSink + ?Sized = dyn DiagnosticSink> {
    limits: &'a ValidationLimits,
    sink: &'a S,
}

impl<'a, S: DiagnosticSink + ?Sized> InputValidator<'a, S> {
    pub fn new(limits: &'a ValidationLimits, sink: &'a S) -> Self {
        Self { limits, sink }
    }

    pub fn limits(&self) -> &ValidationLimits {
        self.limits
    }

    pub fn sanitize_subject(&self, raw: &str) -> String {
        sanitize_subject(
            raw,
            self.limits.max_subject_length,
            &self.limits.default_subject,
        )
    }

    pub fn validate_count(
        &self,
        raw: &str,
        max_value: u32,
        field_name: &str,
    ) -> Result<u32, ValidationError> {
        let trimmed = raw.trim();
        let value = match trimmed.parse::<i64>() {
            Ok(value) => value,
            // Integers too wide for i64 are still integers, just out of range.
            Err(error) if *error.kind() == IntErrorKind::PosOverflow => i64::MAX,
            Err(error) if *error.kind() == IntErrorKind::NegOverflow => i64::MIN,
            Err(_) => {
                self.sink.record_diagnostic(
                    DiagnosticLevel::Warning,
                    &format!("Invalid {field_name} provided: {trimmed:?} is not an integer"),
                );
                return Err(ValidationError::Malformed(format!(
                    "{field_name} must be an integer"
                )));
            }
        };
        self.validate_value(value, max_value, field_name)
    }

    pub fn validate_value(
        &self,
        value: i64,
        max_value: u32,
        field_name: &str,
    ) -> Result<u32, ValidationError> {
        if value > 0 && value <= i64::from(max_value) {
            return Ok(value as u32);
        }
        self.sink.record_diagnostic(
            DiagnosticLevel::Warning,
            &format!("Invalid {field_name} provided: {value}"),
        );
        Err(ValidationError::OutOfRange {
            field: field_name.to_string(),
            value,
            max: max_value,
        })
    }

    /// Parses `repetitions,minutes,subject`.
    pub fn parse_session_request(&self, raw_line: &str) -> Result<SessionParameters, ValidationError> {
        let line = raw_line.trim();
        if line.is_empty() {
            return Err(ValidationError::Malformed("empty input".to_string()));
        }

        let parts = line.split(',').map(str::trim).collect::<Vec<_>>();
        let [repetitions, minutes, subject] = parts.as_slice() else {
            return Err(ValidationError::Malformed(format!(
                "expected 3 comma-separated fields (repetitions,minutes,subject), got {}",
                parts.len()
            )));
        };

        Ok(SessionParameters {
            repetitions: self.validate_count(repetitions, self.limits.max_repetitions, "Repetitions")?,
            minutes: self.validate_count(minutes, self.limits.max_minutes, "Minutes")?,
            subject: self.sanitize_subject(subject),
        })
    }

    /// Front-end entry point: any validation failure degrades to the configured defaults.
    pub fn request_or_defaults(&self, raw_line: &str) -> ParsedRequest {
        match self.parse_session_request(raw_line) {
            Ok(parameters) => ParsedRequest::Parsed(parameters),
            Err(reason) => {
                let parameters = self.limits.default_parameters();
                self.sink.record_diagnostic(
                    DiagnosticLevel::Warning,
                    &format!(
                        "Invalid input provided: {reason}; using defaults ({}, {}, {})",
                        parameters.repetitions, parameters.minutes, parameters.subject
                    ),
                );
                ParsedRequest::Defaulted { parameters, reason }
            }
        }
    }

    /// Re-checks an already constructed triple before it is persisted.
    pub fn validate_parameters(
        &self,
        parameters: &SessionParameters,
    ) -> Result<SessionParameters, ValidationError> {
        Ok(SessionParameters {
            repetitions: self.validate_value(
                i64::from(parameters.repetitions),
                self.limits.max_repetitions,
                "Repetitions",
            )?,
            minutes: self.validate_value(
                i64::from(parameters.minutes),
                self.limits.max_minutes,
                "Minutes",
            )?,
            subject: self.sanitize_subject(&parameters.subject),
        })
    }
}
