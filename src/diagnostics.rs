//! Operator diagnostics.
//!
//! Captures carry a message, a severity, an optional identity and a free
//! context map. They are for operators only and never reach the user.

use serde::Serialize;
use serde_json::{Map, Value};

/// How bad a captured event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Who a capture is about. On a routing miss this is the unresolved
/// token and sender rather than a real account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
}

/// One structured capture.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub severity: Severity,
    pub identity: Option<Identity>,
    pub context: Map<String, Value>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            identity: None,
            context: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn with_identity(mut self, id: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some(Identity {
            id: id.into(),
            email: email.into(),
        });
        self
    }

    /// Add a context value. Values that fail to serialize are stored as null.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.context.insert(key.to_string(), value);
        self
    }
}

/// Receives diagnostic captures. Fire-and-forget.
pub trait DiagnosticsSink: Send + Sync {
    fn capture(&self, diagnostic: Diagnostic);
}

/// Writes each capture as one `tracing` event at its severity.
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn capture(&self, diagnostic: Diagnostic) {
        let context = Value::Object(diagnostic.context);
        let (id, email) = diagnostic
            .identity
            .map(|i| (i.id, i.email))
            .unwrap_or_default();

        match diagnostic.severity {
            Severity::Info => {
                tracing::info!(id = %id, email = %email, context = %context, "{}", diagnostic.message)
            }
            Severity::Warning => {
                tracing::warn!(id = %id, email = %email, context = %context, "{}", diagnostic.message)
            }
            Severity::Error => {
                tracing::error!(id = %id, email = %email, context = %context, "{}", diagnostic.message)
            }
        }
    }
}
