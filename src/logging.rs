//! Tracing subscriber setup for the two kinds of processes.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cluster::worker::IpcLayer;

const DEFAULT_FILTER: &str = "info,tower_http=info";
const LOG_DIR: &str = "logs";

/// Keeps the non-blocking writers flushing; hold it for the life of the process.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into())
}

/// Supervisor and single-process mode: stdout plus a daily rotated file under `./logs`.
pub fn init_console() -> LogGuards {
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let mut guards = vec![stdout_guard];

    let file_layer = match std::fs::create_dir_all(LOG_DIR) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(LOG_DIR, "galleria.log");
            let (file_nb, file_guard) = tracing_appender::non_blocking(appender);
            guards.push(file_guard);
            Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        }
        Err(e) => {
            eprintln!("File logging disabled, could not create {}: {}", LOG_DIR, e);
            None
        }
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(file_layer)
        .init();

    LogGuards { _guards: guards }
}

/// Worker processes: every event is handed to the supervisor over stdout.
pub fn init_worker() {
    tracing_subscriber::registry().with(env_filter()).with(IpcLayer).init();
}
