//! Structured error types shared across lmq crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`LmqError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (model ids, paths, config names).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the operator resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the orchestration engine.
///
/// Every family except [`LmqError::Serde`] maps onto one class of batch failure:
/// configuration problems are raised before any task runs, while the others abort the
/// task in flight and leave previously completed work resumable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum LmqError {
    /// Unknown algorithm, unknown config name or an otherwise malformed experiment.
    #[error("configuration error: {0}")]
    Config(ErrorInfo),
    /// A precomputed artefact required by a task is absent.
    #[error("missing artifact: {0}")]
    MissingArtifact(ErrorInfo),
    /// A create/quantize/evaluate collaborator call failed.
    #[error("collaborator failure: {0}")]
    Collaborator(ErrorInfo),
    /// The progress ledger could not be read, parsed, locked or written.
    #[error("ledger error: {0}")]
    Ledger(ErrorInfo),
    /// Serialization and metric/report file errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl LmqError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            LmqError::Config(info)
            | LmqError::MissingArtifact(info)
            | LmqError::Collaborator(info)
            | LmqError::Ledger(info)
            | LmqError::Serde(info) => info,
        }
    }

    /// Shorthand for a configuration error.
    pub fn config(code: &str, message: impl Into<String>) -> Self {
        LmqError::Config(ErrorInfo::new(code, message))
    }

    /// Shorthand for a collaborator failure.
    pub fn collaborator(code: &str, message: impl Into<String>) -> Self {
        LmqError::Collaborator(ErrorInfo::new(code, message))
    }

    /// Shorthand for a ledger error.
    pub fn ledger(code: &str, message: impl Into<String>) -> Self {
        LmqError::Ledger(ErrorInfo::new(code, message))
    }

    /// Shorthand for a serialization error.
    pub fn serde(code: &str, message: impl Into<String>) -> Self {
        LmqError::Serde(ErrorInfo::new(code, message))
    }
}
