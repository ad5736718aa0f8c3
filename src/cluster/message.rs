//! Line protocol between workers and the supervisor: one JSON object per line on
//! the worker's stdout.

use std::io::Write;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Log,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
}

impl WorkerMessage {
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self { kind, content: content.into() }
    }

    /// Writes the message as a single line to stdout.
    pub fn send(&self) -> std::io::Result<()> {
        let line = serde_json::to_string(self).map_err(std::io::Error::other)?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", line)?;
        out.flush()
    }
}

/// Reads one line of worker output. Anything that is not a message is relayed as a log line.
pub fn parse_line(line: &str) -> WorkerMessage {
    match serde_json::from_str::<WorkerMessage>(line.trim()) {
        Ok(message) => message,
        Err(_) => WorkerMessage::new(MessageKind::Log, line.trim_end()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_lowercase_type() {
        let line = serde_json::to_string(&WorkerMessage::new(MessageKind::Warn, "disk almost full")).unwrap();
        assert_eq!(line, r#"{"type":"warn","content":"disk almost full"}"#);
    }

    #[test]
    fn parses_messages_and_plain_lines() {
        assert_eq!(
            parse_line(r#"{"type":"error","content":"boom"}"#),
            WorkerMessage::new(MessageKind::Error, "boom")
        );
        assert_eq!(parse_line("thread 'main' panicked\n"), WorkerMessage::new(MessageKind::Log, "thread 'main' panicked"));
        assert_eq!(parse_line(r#"{"type":"debug","content":"x"}"#).kind, MessageKind::Log);
    }
}
