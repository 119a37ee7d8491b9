use crate::domain::models::{
    BestEffort, DiagnosticLevel, ProgressState, SessionMode, SessionParameters, SessionRecord,
    POMODORO_SUBJECT,
};
use crate::domain::validation::InputValidator;
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::TimerError;
use crate::infrastructure::session_store::SessionStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running { interval: u32 },
    OnBreak { after_interval: u32 },
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Cancelled,
}

/// Blocks for one tick, returning early when `cancel` fires.
#[async_trait]
pub trait Ticker: Send + Sync {
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> WaitOutcome;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    async fn wait(&self, duration: Duration, cancel: &CancellationToken) -> WaitOutcome {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        tokio::select! {
            _ = cancel.cancelled() => WaitOutcome::Cancelled,
            _ = tokio::time::sleep(duration) => WaitOutcome::Elapsed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: SessionMode,
    pub state: RunnerState,
    /// What the run amounts to: persisted as `record` when it holds at least one repetition.
    pub parameters: SessionParameters,
    pub record: Option<SessionRecord>,
    pub breaks_after: Vec<u32>,
    pub progress_saved: usize,
    pub progress_swallowed: usize,
    pub transitions: Vec<RunnerState>,
}

struct RunContext {
    mode: SessionMode,
    breaks_after: Vec<u32>,
    progress_saved: usize,
    progress_swallowed: usize,
    transitions: Vec<RunnerState>,
}

impl RunContext {
    fn new(mode: SessionMode) -> Self {
        Self {
            mode,
            breaks_after: Vec::new(),
            progress_saved: 0,
            progress_swallowed: 0,
            transitions: vec![RunnerState::Idle],
        }
    }

    fn enter(&mut self, state: RunnerState) {
        match state {
            RunnerState::Running { interval } => {
                tracing::info!(target: "study_timer::runner", "Session {interval} started")
            }
            RunnerState::OnBreak { after_interval } => {
                tracing::info!(target: "study_timer::runner", "Break after session {after_interval}")
            }
            _ => {}
        }
        self.transitions.push(state);
    }

    fn count_progress(&mut self, outcome: BestEffort) {
        match outcome {
            BestEffort::Written => self.progress_saved += 1,
            BestEffort::Swallowed(_) => self.progress_swallowed += 1,
        }
    }

    fn finish(
        mut self,
        state: RunnerState,
        parameters: SessionParameters,
        record: Option<SessionRecord>,
    ) -> RunReport {
        self.transitions.push(state);
        RunReport {
            mode: self.mode,
            state,
            parameters,
            record,
            breaks_after: self.breaks_after,
            progress_saved: self.progress_saved,
            progress_swallowed: self.progress_swallowed,
            transitions: self.transitions,
        }
    }
}

/// Drives timed intervals and persists progress after every tick.
pub struct SessionRunner {
    store: Arc<dyn SessionStore>,
    ticker: Arc<dyn Ticker>,
    config: Arc<AppConfig>,
}

impl SessionRunner {
    pub fn new(store: Arc<dyn SessionStore>, ticker: Arc<dyn Ticker>, config: Arc<AppConfig>) -> Self {
        Self {
            store,
            ticker,
            config,
        }
    }

    fn tick(&self) -> Duration {
        Duration::from_secs(self.config.tick_seconds)
    }

    /// Runs `repetitions` intervals of `minutes`, with a break between consecutive intervals.
    pub async fn run_normal(
        &self,
        parameters: &SessionParameters,
        break_minutes: u32,
        cancel: &CancellationToken,
    ) -> Result<RunReport, TimerError> {
        let (parameters, break_minutes) = {
            let limits = self.config.limits();
            let validator = InputValidator::new(&limits, self.store.as_ref());
            let parameters = validator.validate_parameters(parameters)?;
            let break_minutes = validator.validate_value(
                i64::from(break_minutes),
                self.config.max_minutes,
                "Break time",
            )?;
            (parameters, break_minutes)
        };
        let SessionParameters {
            repetitions,
            minutes,
            ref subject,
        } = parameters;

        self.store.record_diagnostic(
            DiagnosticLevel::Info,
            &format!(
                "Starting study session: {minutes} minute(s), {repetitions} time(s), subject {subject}"
            ),
        );

        let mut context = RunContext::new(SessionMode::Normal);
        for interval in 1..=repetitions {
            context.enter(RunnerState::Running { interval });
            for elapsed in 1..=minutes {
                if self.ticker.wait(self.tick(), cancel).await == WaitOutcome::Cancelled {
                    return self.cancel_normal(context, &parameters, interval - 1);
                }
                let snapshot = ProgressState::new(
                    subject.clone(),
                    repetitions - interval + 1,
                    minutes - elapsed,
                );
                context.count_progress(self.store.save_progress(&snapshot));
            }

            if interval < repetitions {
                context.enter(RunnerState::OnBreak {
                    after_interval: interval,
                });
                context.breaks_after.push(interval);
                for _ in 0..break_minutes {
                    if self.ticker.wait(self.tick(), cancel).await == WaitOutcome::Cancelled {
                        return self.cancel_normal(context, &parameters, interval);
                    }
                }
            }
        }

        let record = self.persist(&parameters)?;
        self.clear_progress();
        Ok(context.finish(RunnerState::Completed, parameters, Some(record)))
    }

    /// Cycles work/break intervals until `cancel` fires; cancellation completes the run.
    pub async fn run_pomodoro(&self, cancel: &CancellationToken) -> Result<RunReport, TimerError> {
        let work_minutes = self.config.pomodoro_work_minutes;
        let break_minutes = self.config.pomodoro_break_minutes;
        let mut context = RunContext::new(SessionMode::Pomodoro);
        let mut session_count: u32 = 0;

        self.store
            .record_diagnostic(DiagnosticLevel::Info, "Starting pomodoro mode");

        'cycles: loop {
            context.enter(RunnerState::Running {
                interval: session_count + 1,
            });
            for elapsed in 1..=work_minutes {
                if self.ticker.wait(self.tick(), cancel).await == WaitOutcome::Cancelled {
                    break 'cycles;
                }
                let snapshot = ProgressState::new(POMODORO_SUBJECT, 1, work_minutes - elapsed);
                context.count_progress(self.store.save_progress(&snapshot));
            }

            session_count += 1;
            context.enter(RunnerState::OnBreak {
                after_interval: session_count,
            });
            context.breaks_after.push(session_count);
            for _ in 0..break_minutes {
                if self.ticker.wait(self.tick(), cancel).await == WaitOutcome::Cancelled {
                    break 'cycles;
                }
            }
        }

        self.store.record_diagnostic(
            DiagnosticLevel::Info,
            &format!("Pomodoro mode ended after {session_count} sessions"),
        );
        let parameters = SessionParameters::new(session_count, work_minutes, POMODORO_SUBJECT);
        let record = if session_count == 0 {
            self.store.record_diagnostic(
                DiagnosticLevel::Info,
                "No pomodoro session completed; nothing recorded",
            );
            None
        } else {
            Some(self.persist(&parameters)?)
        };
        self.clear_progress();
        Ok(context.finish(RunnerState::Completed, parameters, record))
    }

    fn cancel_normal(
        &self,
        context: RunContext,
        parameters: &SessionParameters,
        completed: u32,
    ) -> Result<RunReport, TimerError> {
        self.store.record_diagnostic(
            DiagnosticLevel::Info,
            &format!(
                "Study session cancelled after {completed} of {} repetitions",
                parameters.repetitions
            ),
        );
        let completed_parameters =
            SessionParameters::new(completed, parameters.minutes, parameters.subject.clone());
        let record = if completed > 0 {
            Some(self.persist(&completed_parameters)?)
        } else {
            None
        };
        Ok(context.finish(RunnerState::Cancelled, completed_parameters, record))
    }

    fn persist(&self, parameters: &SessionParameters) -> Result<SessionRecord, TimerError> {
        match self.store.append_session(parameters) {
            Ok(record) => {
                self.store.record_diagnostic(
                    DiagnosticLevel::Info,
                    &format!("Successfully logged study session {}", record.id),
                );
                Ok(record)
            }
            Err(error) => {
                self.store.record_diagnostic(
                    DiagnosticLevel::Error,
                    &format!(
                        "Failed to log study session ({}, {}, {}): {error}",
                        parameters.repetitions, parameters.minutes, parameters.subject
                    ),
                );
                Err(error)
            }
        }
    }

    fn clear_progress(&self) {
        if let Err(error) = self.store.clear_progress() {
            self.store.record_diagnostic(
                DiagnosticLevel::Warning,
                &format!("Failed to clear stale progress: {error}"),
            );
        }
    }
}
