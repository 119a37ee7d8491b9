use crate::infrastructure::error::TimerError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "study_timer=info";
pub const LOG_FILE_PREFIX: &str = "study_timer";
pub const LOG_FILE_SUFFIX: &str = "log";
/// The active file plus three rotated ones.
const MAX_LOG_FILES: usize = 4;

/// Rolling `logs/study_timer.<date>.log` writer. Keep the guard alive to flush on exit.
pub fn file_writer(logs_dir: &Path) -> Result<(NonBlocking, WorkerGuard), TimerError> {
    fs::create_dir_all(logs_dir)?;
    restrict_directory(logs_dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(logs_dir)
        .map_err(|error| {
            TimerError::InvalidConfig(format!(
                "cannot open log file in {}: {error}",
                logs_dir.display()
            ))
        })?;
    Ok(tracing_appender::non_blocking(appender))
}

/// Installs the console layer on stderr and, when possible, the rolling file layer.
/// `RUST_LOG` overrides the default filter.
pub fn init_logging(logs_dir: &Path) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let console = fmt::layer().with_writer(std::io::stderr);

    match file_writer(logs_dir) {
        Ok((writer, guard)) => {
            tracing_subscriber::registry()
                .with(filter)
                .with(console)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        Err(error) => {
            tracing_subscriber::registry().with(filter).with(console).init();
            tracing::warn!(target: "study_timer::logging", "file logging disabled: {error}");
            None
        }
    }
}

#[cfg(unix)]
fn restrict_directory(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_directory(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_writer_persists_events_under_logs_dir() {
        let dir = TempDir::new().expect("temp dir");
        let logs_dir = dir.path().join("logs");
        let (writer, guard) = file_writer(&logs_dir).expect("open log file");

        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(writer));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "study_timer::logging", "session log line");
        });
        drop(guard);

        let contents = fs::read_dir(&logs_dir)
            .expect("list logs dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(LOG_FILE_PREFIX))
            .filter_map(|entry| fs::read_to_string(entry.path()).ok())
            .collect::<String>();
        assert!(contents.contains("session log line"));
    }

    #[cfg(unix)]
    #[test]
    fn logs_dir_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let logs_dir = dir.path().join("logs");
        let (_writer, _guard) = file_writer(&logs_dir).expect("open log file");
        let mode = fs::metadata(&logs_dir).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}
