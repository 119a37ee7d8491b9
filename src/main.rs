use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use study_timer::application::commands::{
    clear_progress_impl, get_progress_impl, list_diagnostics_impl, list_sessions_impl,
    parse_arguments_impl, parse_prompt_impl, recovery_snapshot_impl, self_test_impl,
    start_pomodoro_impl, start_session_impl,
};
use study_timer::application::queries::DEFAULT_DIAGNOSTIC_LIMIT;
use study_timer::infrastructure::logging::init_logging;
use study_timer::{
    AppState, ParsedRequest, ProgressState, RunReport, RunnerState, SessionParameters,
    StorageBackend, TimerError, TokioTicker,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "study-timer", version)]
#[command(about = "Study-session timer with durable history and crash recovery", long_about = None)]
struct Cli {
    /// Workspace holding config/, state/ and logs/ (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Overrides the storage backend from config/app.json
    #[arg(long, global = true, value_parser = parse_storage)]
    storage: Option<StorageBackend>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a normal session; without arguments the parameters are prompted for
    Start {
        #[arg(allow_hyphen_values = true)]
        repetitions: Option<String>,
        #[arg(allow_hyphen_values = true)]
        minutes: Option<String>,
        subject: Option<String>,
    },
    /// Cycle work and break intervals until interrupted
    Pomodoro,
    /// List completed sessions, newest first
    History {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show recent diagnostic entries
    Diagnostics {
        #[arg(long, default_value_t = DEFAULT_DIAGNOSTIC_LIMIT)]
        limit: usize,
    },
    /// Show the interrupted session snapshot, if any
    Progress,
    /// Discard the interrupted session snapshot
    ClearProgress,
    /// Write a (2, 2, "test") session into a scratch log
    SelfTest,
}

fn parse_storage(value: &str) -> Result<StorageBackend, String> {
    value.parse().map_err(|error: TimerError| error.to_string())
}

struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Returns `None` once stdin is closed.
    async fn ask(&mut self, question: &str) -> Result<Option<String>, TimerError> {
        print!("{question}");
        std::io::stdout().flush()?;
        Ok(self.lines.next_line().await?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let workspace_root = match cli.root.clone() {
        Some(root) => root,
        None => match std::env::current_dir() {
            Ok(root) => root,
            Err(error) => {
                eprintln!("error: {error}");
                return ExitCode::FAILURE;
            }
        },
    };
    let _log_guard = init_logging(&workspace_root.join("logs"));

    match run(cli, workspace_root).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, workspace_root: PathBuf) -> Result<(), TimerError> {
    let state = AppState::new(workspace_root, cli.storage)?;
    let mut prompt = Prompt::new();

    let command = match cli.command {
        Some(command) => command,
        None => match choose_mode(&mut prompt).await? {
            Some(command) => command,
            None => return Ok(()),
        },
    };

    match command {
        Commands::Start {
            repetitions,
            minutes,
            subject,
        } => {
            let parameters = match (repetitions, minutes, subject) {
                (None, None, None) => prompt_parameters(&state, &mut prompt).await?,
                (Some(repetitions), Some(minutes), Some(subject)) => {
                    match parse_arguments_impl(&state, &repetitions, &minutes, &subject) {
                        Ok(parameters) => parameters,
                        Err(error) if error.is_validation() => {
                            println!("Invalid arguments ({error}); switching to interactive mode.");
                            prompt_parameters(&state, &mut prompt).await?
                        }
                        Err(error) => return Err(error),
                    }
                }
                _ => {
                    println!("Expected REPETITIONS MINUTES SUBJECT; switching to interactive mode.");
                    prompt_parameters(&state, &mut prompt).await?
                }
            };

            announce_interrupted(&state);
            println!(
                "Studying {} for {} repetition(s) of {} minute(s). Press Ctrl-C to stop.",
                parameters.subject, parameters.repetitions, parameters.minutes
            );
            let cancel = cancel_on_ctrl_c();
            let report = start_session_impl(&state, parameters, Arc::new(TokioTicker), &cancel)
                .await
                .map_err(|error| {
                    state.command_error("start_session", &error);
                    error
                })?;
            print_report(&report);
        }
        Commands::Pomodoro => {
            announce_interrupted(&state);
            println!(
                "Pomodoro mode: {} minute(s) of work, {} minute(s) of break. Press Ctrl-C to stop.",
                state.config().pomodoro_work_minutes,
                state.config().pomodoro_break_minutes
            );
            let cancel = cancel_on_ctrl_c();
            let report = start_pomodoro_impl(&state, Arc::new(TokioTicker), &cancel)
                .await
                .map_err(|error| {
                    state.command_error("start_pomodoro", &error);
                    error
                })?;
            print_report(&report);
        }
        Commands::History { limit } => {
            let sessions = list_sessions_impl(&state, limit);
            if sessions.is_empty() {
                println!("No sessions recorded.");
            }
            for record in sessions {
                println!(
                    "{}  {:<20}  {:>3} x {:>3} min  {}",
                    record.date, record.subject, record.repetitions, record.minutes, record.id
                );
            }
        }
        Commands::Diagnostics { limit } => {
            for entry in list_diagnostics_impl(&state, limit) {
                println!(
                    "{} [{}] {}",
                    entry.timestamp.to_rfc3339(),
                    entry.level,
                    entry.message
                );
            }
        }
        Commands::Progress => match get_progress_impl(&state) {
            Some(progress) => println!("{}", describe_progress(&progress)),
            None => println!("No session in progress."),
        },
        Commands::ClearProgress => {
            clear_progress_impl(&state).map_err(|error| {
                state.command_error("clear_progress", &error);
                error
            })?;
            println!("Progress cleared.");
        }
        Commands::SelfTest => {
            let response = self_test_impl(&state).map_err(|error| {
                state.command_error("self_test", &error);
                error
            })?;
            println!(
                "Self-test passed: wrote session {} to {}",
                response.record.id, response.sessions_path
            );
        }
    }

    Ok(())
}

async fn choose_mode(prompt: &mut Prompt) -> Result<Option<Commands>, TimerError> {
    loop {
        let Some(answer) = prompt
            .ask("Choose a mode (1: normal session, 2: pomodoro): ")
            .await?
        else {
            return Ok(None);
        };
        match answer.trim() {
            "1" => {
                return Ok(Some(Commands::Start {
                    repetitions: None,
                    minutes: None,
                    subject: None,
                }));
            }
            "2" => return Ok(Some(Commands::Pomodoro)),
            other => println!("Unknown mode {other:?}; enter 1 or 2."),
        }
    }
}

async fn prompt_parameters(
    state: &AppState,
    prompt: &mut Prompt,
) -> Result<SessionParameters, TimerError> {
    let line = prompt
        .ask("Enter repetitions,minutes,subject: ")
        .await?
        .unwrap_or_default();
    let request = parse_prompt_impl(state, &line);
    if let ParsedRequest::Defaulted { parameters, reason } = &request {
        println!(
            "{reason}; using defaults ({}, {}, {}).",
            parameters.repetitions, parameters.minutes, parameters.subject
        );
    }
    Ok(request.into_parameters())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(target: "study_timer::cli", "interrupt received, stopping");
            trigger.cancel();
        }
    });
    cancel
}

fn announce_interrupted(state: &AppState) {
    if let Some(progress) = recovery_snapshot_impl(state).interrupted {
        println!("Previous run was interrupted: {}", describe_progress(&progress));
    }
}

fn describe_progress(progress: &ProgressState) -> String {
    format!(
        "{}: {} repetition(s) remaining, {} minute(s) left in the current one",
        progress.subject, progress.repetitions_remaining, progress.minutes_remaining
    )
}

fn print_report(report: &RunReport) {
    let outcome = match report.state {
        RunnerState::Cancelled => "cancelled",
        _ => "finished",
    };
    match &report.record {
        Some(record) => println!(
            "Session {outcome}: logged {} x {} min of {} ({}).",
            record.repetitions, record.minutes, record.subject, record.id
        ),
        None => println!("Session {outcome}: nothing to log."),
    }
    if report.progress_swallowed > 0 {
        println!(
            "Warning: {} progress snapshot(s) could not be saved.",
            report.progress_swallowed
        );
    }
}
