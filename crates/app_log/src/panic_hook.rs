//! Panic hook for crash reporting

use backtrace::Backtrace;
use chrono::{DateTime, Local};
use std::panic::{Location, PanicHookInfo};
use std::path::PathBuf;

/// Initialize the panic hook for crash reporting
pub fn init_panic_hook() {
    std::panic::set_hook(Box::new(panic_handler));
    tracing::debug!("Panic hook initialized");
}

fn payload_message<'a>(info: &'a PanicHookInfo) -> &'a str {
    let payload = info.payload();
    if let Some(s) = payload.downcast_ref::<&str>() {
        return s;
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.as_str();
    }
    "<unknown>"
}

fn crash_report(
    time: DateTime<Local>,
    thread: &str,
    location: Option<&Location<'_>>,
    message: &str,
    backtrace: &Backtrace,
) -> String {
    let location = location
        .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
        .unwrap_or_else(|| "<unknown>".to_string());

    format!(
        "=== browsefs crashed ===\n\
         Version: {}\n\
         Timestamp: {}\n\
         Thread: {}\n\
         Location: {}\n\
         Message: {}\n\n\
         Stack Trace:\n{:?}",
        env!("CARGO_PKG_VERSION"),
        time.to_rfc3339(),
        thread,
        location,
        message,
        backtrace
    )
}

/// Next to the logs when that directory exists, temp dir otherwise
fn dump_path(time: DateTime<Local>) -> PathBuf {
    let filename = format!("browsefs_crash_{}.txt", time.format("%Y%m%d_%H%M%S"));
    let log_dir = super::log_dir();
    if log_dir.is_dir() {
        log_dir.join(filename)
    } else {
        std::env::temp_dir().join(filename)
    }
}

fn panic_handler(info: &PanicHookInfo) {
    let now = Local::now();
    let thread = std::thread::current();
    let report = crash_report(
        now,
        thread.name().unwrap_or("<unnamed>"),
        info.location(),
        payload_message(info),
        &Backtrace::new(),
    );

    // stderr first, the log writer may already be gone
    eprintln!("{}", report);
    tracing::error!("{}", report);

    let path = dump_path(now);
    match std::fs::write(&path, &report) {
        Ok(()) => eprintln!("Crash report written to {}", path.display()),
        Err(e) => eprintln!("Failed to write crash dump: {}", e),
    }
}
