//! File logging for the CLI.
//!
//! Output goes to a daily-rotated file under `~/.attendance/logs` so the
//! terminal only shows command results. `ATTENDANCE_DEBUG_LOG=1` raises the
//! level to debug.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "attendance-client.log";

/// Returns the writer guard; dropping it flushes pending lines.
pub fn init() -> Option<WorkerGuard> {
    let log_dir = dirs::home_dir()?.join(".attendance").join("logs");
    if fs_err::create_dir_all(&log_dir).is_err() {
        return None;
    }

    let debug_enabled = std::env::var("ATTENDANCE_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;
    Some(guard)
}
