//! Worker stderr classification.
//!
//! Workers log to stderr with ad-hoc prefixes. Lines are sorted into a
//! severity and forwarded to `tracing`; they never affect the RPC state.

use std::fmt;
use tracing::{error, info, warn};

/// Severity of a worker diagnostic line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// Classify a stderr line by its markers.
///
/// `ERROR:` wins over `WARNING:`/`WARN:`; anything else is informational.
pub fn classify(line: &str) -> Severity {
    if line.contains("ERROR:") {
        Severity::Error
    } else if line.contains("WARNING:") || line.contains("WARN:") {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// One classified stderr line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn from_line(line: impl Into<String>) -> Self {
        let message = line.into();
        Self {
            severity: classify(&message),
            message,
        }
    }
}

/// Forward a diagnostic to the log at its severity.
pub fn emit(server: &str, diagnostic: &Diagnostic) {
    match diagnostic.severity {
        Severity::Error => error!(server = %server, "{}", diagnostic.message),
        Severity::Warning => warn!(server = %server, "{}", diagnostic.message),
        Severity::Info => info!(server = %server, "{}", diagnostic.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("ERROR: db unreachable"), Severity::Error);
        assert_eq!(classify("2024-01-01 WARNING: slow query"), Severity::Warning);
        assert_eq!(classify("WARN: retrying"), Severity::Warning);
        assert_eq!(classify("Server ready"), Severity::Info);
        assert_eq!(classify("error: lowercase is info"), Severity::Info);
    }

    #[test]
    fn test_error_takes_precedence() {
        assert_eq!(classify("WARNING: then ERROR: both"), Severity::Error);
    }

    #[test]
    fn test_from_line() {
        let diag = Diagnostic::from_line("WARNING: deprecated flag");
        assert_eq!(diag.severity, Severity::Warning);
        assert_eq!(diag.message, "WARNING: deprecated flag");
    }

    #[test]
    fn test_emit_does_not_panic_without_subscriber() {
        emit("monitoring", &Diagnostic::from_line("ERROR: x"));
        emit("monitoring", &Diagnostic::from_line("plain"));
    }
}
