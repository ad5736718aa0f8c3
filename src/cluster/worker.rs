//! Worker side of the cluster: logs travel to the supervisor as [`WorkerMessage`]s.

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::message::{MessageKind, WorkerMessage};
use crate::config::AppConfig;
use crate::server::{self, Role};

/// Set on re-executed workers; holds the worker's number.
pub const WORKER_ID_ENV: &str = "GALLERIA_WORKER_ID";
/// Set on the one worker that runs scheduled tasks.
pub const RUN_TASKS_ENV: &str = "GALLERIA_RUN_TASKS";

/// Worker number when this process was started by the supervisor.
pub fn worker_id() -> Option<u64> {
    std::env::var(WORKER_ID_ENV).ok().and_then(|v| v.parse().ok())
}

pub fn runs_tasks() -> bool {
    std::env::var(RUN_TASKS_ENV).map(|v| v == "1").unwrap_or(false)
}

/// Forwards every event to the supervisor as one message line.
pub struct IpcLayer;

impl<S: Subscriber> Layer<S> for IpcLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let kind = match *event.metadata().level() {
            Level::ERROR => MessageKind::Error,
            Level::WARN => MessageKind::Warn,
            _ => MessageKind::Log,
        };
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        // Nowhere left to report to if stdout is gone.
        let _ = WorkerMessage::new(kind, visitor.finish()).send();
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        let _ = write!(self.fields, " {}={}", name, value);
    }

    fn finish(self) -> String {
        format!("{}{}", self.message, self.fields)
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{}", value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.push_field(field.name(), format_args!("{:?}", value));
        }
    }
}

/// Reports panics the way uncaught errors are reported: as an `error` message.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let _ = WorkerMessage::new(MessageKind::Error, format!("Uncaught panic: {}", info)).send();
    }));
}

/// Runs the HTTP server of one worker until shutdown.
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    let role = Role::Worker { id: worker_id().unwrap_or_default(), run_tasks: runs_tasks() };
    server::run(cfg, role).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    struct Capture(std::sync::Arc<std::sync::Mutex<Vec<(Level, String)>>>);

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor::default();
            event.record(&mut visitor);
            self.0.lock().unwrap().push((*event.metadata().level(), visitor.finish()));
        }
    }

    #[test]
    fn visitor_keeps_message_and_fields() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(Capture(seen.clone()));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(album = "Coast", files = 3, "Archive written");
        });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, Level::WARN);
        assert_eq!(seen[0].1, "Archive written album=Coast files=3");
    }
}
