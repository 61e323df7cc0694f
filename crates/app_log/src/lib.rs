//! browsefs Logging & Observability Module
//!
//! Provides structured logging and crash reports.

mod logging;
mod panic_hook;

pub use logging::{cleanup_old_logs, init_logging, LogGuard, LOG_FILE_PREFIX};
pub use panic_hook::init_panic_hook;

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application log directory
pub fn log_dir() -> PathBuf {
    ProjectDirs::from("com", "browsefs", "browsefs")
        .map(|dirs| dirs.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("./logs"))
}

/// Initialize all observability features
///
/// `level` is used when `RUST_LOG` is not set. The returned guard flushes
/// the log file when dropped and must be kept alive until exit.
pub fn init(level: &str, log_file: bool) -> anyhow::Result<LogGuard> {
    let guard = init_logging(level, log_file)?;
    init_panic_hook();
    Ok(guard)
}
