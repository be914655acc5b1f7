//! Logging for the CLI.
//!
//! Events go to stderr at `info` (or `debug` with `--debug`) and to a daily
//! rolling file under `~/.local/state/sshmount/`. `RUST_LOG` overrides the
//! level of both. Stdout is never used for logs, it belongs to the remote
//! command.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// The directory under `~/.local/state/` where logs are stored.
const LOG_DIR_NAME: &str = "sshmount";

/// The base filename for the rolling log file.
const LOG_FILE_NAME: &str = "debug.log";

/// Initialise the tracing subscriber with stderr + file layers.
///
/// Returns a [`WorkerGuard`] that **must** be held for the lifetime of the
/// program. Dropping it flushes and closes the log file writer.
pub fn init_logging(debug: bool) -> WorkerGuard {
    let log_dir = log_directory();

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "warning: could not create log directory {}: {e}",
            log_dir.display()
        );
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(debug);

    tracing_subscriber::registry()
        .with(env_filter(debug))
        .with(file_layer)
        .with(stderr_layer)
        .init();

    guard
}

/// `RUST_LOG` if set, otherwise `info` or `debug`. Tokio internals stay at
/// `warn` either way.
fn env_filter(debug: bool) -> EnvFilter {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level(debug)));
    match "tokio=warn".parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

fn default_level(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Resolve the log directory path.
///
/// Uses `dirs::state_dir()` (`~/.local/state/sshmount/` on Linux). Falls
/// back to `~/.local/state/sshmount/` when the platform has no state
/// directory, and to the current directory without a home.
fn log_directory() -> std::path::PathBuf {
    if let Some(state) = dirs::state_dir() {
        return state.join(LOG_DIR_NAME);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("state").join(LOG_DIR_NAME);
    }
    std::path::PathBuf::from(".")
}
