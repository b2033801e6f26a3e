//! Tracing setup: console output plus a rotating file sink. Generalizes
//! the teacher's `main.rs` `tracing_subscriber` init (`EnvFilter` +
//! optional JSON layer) with the rotating-file behavior of
//! `original_source/app/utils/common.py::setup_logging`.

use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Returned to the caller so the non-blocking file writer's background
/// thread stays alive for the process lifetime.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init(log_level: &str, json: bool, log_dir: &Path) -> LoggingGuard {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file_dir = resolve_log_dir(log_dir);
    let file_appender = tracing_appender::rolling::daily(&file_dir, "captn.log");
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true);
    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(console_layer.json()).with(file_layer.json()).init();
    } else {
        registry.with(console_layer).with(file_layer).init();
    }

    LoggingGuard { _file_guard: Some(file_guard) }
}

/// Falls back to `./logs` when `/app/logs` (or whatever configured
/// directory) can't be created, mirroring `setup_logging`'s tolerance for
/// running outside its expected container filesystem layout.
fn resolve_log_dir(preferred: &Path) -> PathBuf {
    if std::fs::create_dir_all(preferred).is_ok() {
        preferred.to_path_buf()
    } else {
        let fallback = PathBuf::from("./logs");
        let _ = std::fs::create_dir_all(&fallback);
        fallback
    }
}

pub fn clear_logs(log_dir: &Path) {
    if let Ok(entries) = std::fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            if entry.path().extension().map(|e| e == "log").unwrap_or(false) {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}
