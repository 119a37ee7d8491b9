use crate::domain::models::{
    BestEffort, DiagnosticEntry, DiagnosticLevel, ProgressState, SessionParameters, SessionRecord,
};
use crate::domain::validation::{DiagnosticSink, ValidationLimits};
use crate::infrastructure::error::TimerError;
use crate::infrastructure::session_store::{
    prepare_record, report_swallowed, trace_diagnostic, SessionStore,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const PROGRESS_SLOT_ID: i64 = 1;

pub fn initialize_database(path: &Path) -> Result<(), TimerError> {
    let connection = Connection::open(path)?;
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

/// SQLite backing. A connection is opened per operation and dropped before returning.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    db_path: PathBuf,
    limits: ValidationLimits,
}

impl SqliteSessionStore {
    /// Creates the schema if needed. A database that cannot be initialized still yields a
    /// store: its reads come back empty and its writes fail with `StoreUnavailable`.
    pub fn open(db_path: impl AsRef<Path>, limits: ValidationLimits) -> Self {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
            limits,
        };
        if let Err(error) = initialize_database(&store.db_path) {
            store.record_diagnostic(
                DiagnosticLevel::Warning,
                &format!(
                    "session database {} is unusable ({error}); history reads as empty",
                    store.db_path.display()
                ),
            );
        }
        store
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, TimerError> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        Ok(connection)
    }

    fn read<T>(
        &self,
        context: &str,
        query: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Option<T> {
        let result = self
            .connect()
            .and_then(|connection| query(&connection).map_err(TimerError::from));
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                report_swallowed(context, &error);
                None
            }
        }
    }
}

impl DiagnosticSink for SqliteSessionStore {
    fn record_diagnostic(&self, level: DiagnosticLevel, message: &str) -> BestEffort {
        trace_diagnostic(level, message);
        let entry = DiagnosticEntry::now(level, message);
        let result = self.connect().and_then(|connection| {
            connection.execute(
                "INSERT INTO diagnostics (level, message, timestamp) VALUES (?1, ?2, ?3)",
                params![entry.level.as_str(), entry.message, entry.timestamp.to_rfc3339()],
            )?;
            Ok(())
        });
        match result {
            Ok(()) => BestEffort::Written,
            Err(error) => report_swallowed("record diagnostic", &error),
        }
    }
}

impl SessionStore for SqliteSessionStore {
    fn append_session(&self, parameters: &SessionParameters) -> Result<SessionRecord, TimerError> {
        let record = prepare_record(&self.limits, self, parameters)?;
        let insert = || -> Result<(), TimerError> {
            let connection = self.connect()?;
            connection.execute(
                "INSERT INTO study_sessions (id, name, repetitions, minutes, date, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.subject,
                    record.repetitions,
                    record.minutes,
                    record.date.to_string(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        };
        insert().map_err(|error| TimerError::store_unavailable("append session", error))?;
        Ok(record)
    }

    fn save_progress(&self, state: &ProgressState) -> BestEffort {
        let result = self.connect().and_then(|connection| {
            connection.execute(
                "INSERT INTO session_progress (id, name, repetitions_remaining, minutes_remaining, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   repetitions_remaining = excluded.repetitions_remaining,
                   minutes_remaining = excluded.minutes_remaining,
                   updated_at = excluded.updated_at",
                params![
                    PROGRESS_SLOT_ID,
                    state.subject,
                    state.repetitions_remaining,
                    state.minutes_remaining,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        });
        match result {
            Ok(()) => BestEffort::Written,
            Err(error) => report_swallowed("save progress", &error),
        }
    }

    fn clear_progress(&self) -> Result<(), TimerError> {
        let connection = self
            .connect()
            .map_err(|error| TimerError::store_unavailable("clear progress", error))?;
        connection
            .execute(
                "DELETE FROM session_progress WHERE id = ?1",
                params![PROGRESS_SLOT_ID],
            )
            .map_err(|error| TimerError::store_unavailable("clear progress", error))?;
        Ok(())
    }

    fn load_progress(&self) -> Option<ProgressState> {
        self.read("load progress", |connection| {
            connection
                .query_row(
                    "SELECT name, repetitions_remaining, minutes_remaining
                     FROM session_progress WHERE id = ?1",
                    params![PROGRESS_SLOT_ID],
                    |row| {
                        Ok(ProgressState {
                            subject: row.get(0)?,
                            repetitions_remaining: row.get(1)?,
                            minutes_remaining: row.get(2)?,
                        })
                    },
                )
                .optional()
        })
        .flatten()
    }

    fn list_sessions(&self) -> Vec<SessionRecord> {
        let rows = self.read("list sessions", |connection| {
            let mut statement = connection.prepare(
                "SELECT id, name, repetitions, minutes, date
                 FROM study_sessions ORDER BY rowid DESC",
            )?;
            let rows = statement
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u32>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        });

        rows.unwrap_or_default()
            .into_iter()
            .filter_map(|(id, subject, repetitions, minutes, date)| {
                let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").ok()?;
                Some(SessionRecord {
                    id,
                    subject,
                    repetitions,
                    minutes,
                    date,
                })
            })
            .collect()
    }

    fn list_diagnostics(&self, limit: usize) -> Vec<DiagnosticEntry> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.read("list diagnostics", |connection| {
            let mut statement = connection.prepare(
                "SELECT level, message, timestamp FROM diagnostics ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = statement
                .query_map(params![limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        });

        rows.unwrap_or_default()
            .into_iter()
            .filter_map(|(level, message, timestamp)| {
                Some(DiagnosticEntry {
                    level: DiagnosticLevel::parse(&level)?,
                    message,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .ok()?
                        .with_timezone(&Utc),
                })
            })
            .collect()
    }
}
