//! Operator-facing messages collected during build and deploy.
//!
//! Every engine operation returns its messages alongside success or
//! failure so a caller can render outcomes without inspecting internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of an operator-facing message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message.
    Info,
    /// Something unexpected that did not stop the operation.
    Warning,
    /// A failure that affected the operation's outcome.
    Error,
}

/// A single operator-facing message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message severity.
    pub severity: Severity,
    /// Message text.
    pub text: String,
    /// When the message was emitted.
    pub timestamp: DateTime<Utc>,
}

/// Counts of messages by severity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageSummary {
    /// Number of informational messages.
    pub info: usize,
    /// Number of warnings.
    pub warning: usize,
    /// Number of errors.
    pub error: usize,
}

/// Accumulates messages during an operation.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl Message {
    /// Creates a message with the given severity.
    #[must_use]
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Creates an informational message.
    #[must_use]
    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }

    /// Creates a warning message.
    #[must_use]
    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, text)
    }

    /// Creates an error message.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, text)
    }
}

impl MessageLog {
    /// Creates an empty message log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Appends a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Appends every message from another log.
    pub fn extend(&mut self, other: Self) {
        self.messages.extend(other.messages);
    }

    /// Returns the collected messages.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Consumes the log, returning the collected messages.
    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Returns true if any error-severity message was collected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| m.severity == Severity::Error)
    }

    /// Computes per-severity counts.
    #[must_use]
    pub fn summary(&self) -> MessageSummary {
        let mut summary = MessageSummary::default();
        for message in &self.messages {
            match message.severity {
                Severity::Info => summary.info += 1,
                Severity::Warning => summary.warning += 1,
                Severity::Error => summary.error += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.severity, self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let mut log = MessageLog::new();
        log.push(Message::info("built"));
        log.push(Message::warning("observer slow"));
        log.push(Message::error("action failed"));
        log.push(Message::error("dependent blocked"));

        let summary = log.summary();
        assert_eq!(summary.info, 1);
        assert_eq!(summary.warning, 1);
        assert_eq!(summary.error, 2);
        assert!(log.has_errors());
    }

    #[test]
    fn test_display() {
        let msg = Message::warning("drift detected");
        assert_eq!(msg.to_string(), "[warning] drift detected");
    }
}
