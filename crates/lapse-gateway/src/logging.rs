//! Console output plus daily-rotated `combined` and `error` log files.

use lapse_core::config::LoggingConfig;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

const DEFAULT_FILTER: &str =
    "lapse_gateway=info,lapse_scheduler=info,lapse_jobs=info,lapse_bookings=info,tower_http=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Install the global subscriber. Keep the returned guards alive until exit
/// or buffered file lines are lost.
pub fn init_logging(cfg: &LoggingConfig) -> Vec<WorkerGuard> {
    let mut guards = Vec::new();

    let console = fmt::layer().with_target(true).with_filter(env_filter());

    let combined = file_writer(cfg, "combined").map(|(writer, guard)| {
        guards.push(guard);
        fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(env_filter())
    });
    let errors = file_writer(cfg, "error").map(|(writer, guard)| {
        guards.push(guard);
        fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(LevelFilter::ERROR)
    });

    tracing_subscriber::registry()
        .with(console)
        .with(combined)
        .with(errors)
        .init();

    if cfg.file && !guards.is_empty() {
        tracing::info!(dir = %cfg.dir, "writing log files");
    }
    guards
}

/// `<dir>/<prefix>.<date>.log`, or `None` when file logging is off or the
/// directory cannot be used.
fn file_writer(cfg: &LoggingConfig, prefix: &str) -> Option<(NonBlocking, WorkerGuard)> {
    if !cfg.file {
        return None;
    }
    match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(&cfg.dir)
    {
        Ok(appender) => Some(tracing_appender::non_blocking(appender)),
        Err(e) => {
            // no subscriber yet
            eprintln!("lapse: cannot write {prefix} log in {}: {e}", cfg.dir);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(dir: &std::path::Path, file: bool) -> LoggingConfig {
        LoggingConfig {
            file,
            dir: dir.to_string_lossy().into_owned(),
        }
    }

    #[test]
    fn file_writer_creates_dated_files() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");

        let (mut writer, guard) = file_writer(&config(&logs, true), "error").unwrap();
        writer.write_all(b"disk full\n").unwrap();
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(&logs)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("error.") && files[0].ends_with(".log"));
        let content = std::fs::read_to_string(logs.join(&files[0])).unwrap();
        assert!(content.contains("disk full"));
    }

    #[test]
    fn file_logging_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        assert!(file_writer(&config(&logs, false), "combined").is_none());
        assert!(!logs.exists());
    }
}
