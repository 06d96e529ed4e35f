pub mod diagnostic;

pub use diagnostic::Diagnostic;

use std::path::PathBuf;
use thiserror::Error;

/// A protocol definition could not be loaded. Loading is all-or-nothing: when any of
/// these is returned, nothing was cached.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to read protocol {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol is not valid {format}: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },

    #[error("schema error at {location}: {message}")]
    Schema { location: String, message: String },

    #[error("duplicate {kind} '{id}' in {scope}")]
    DuplicateId {
        kind: &'static str,
        id: String,
        scope: String,
    },
}

impl ProtocolError {
    pub(crate) fn schema(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            location: location.into(),
            message: message.into(),
        }
    }

    pub(crate) fn duplicate(
        kind: &'static str,
        id: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self::DuplicateId {
            kind,
            id: id.into(),
            scope: scope.into(),
        }
    }
}

/// State machine misuse and lookup failures. None of these are ever ignored by the engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid {entity} transition '{action}' for '{id}' from {from}: {reason}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        action: &'static str,
        reason: String,
    },

    #[error("unknown run: {0}")]
    UnknownRun(String),

    #[error("run already registered: {0}")]
    DuplicateRun(String),

    #[error("unknown phase '{phase_id}' in run {run_id}")]
    UnknownPhase { run_id: String, phase_id: String },

    #[error("unknown step '{step_id}' in run {run_id}")]
    UnknownStep { run_id: String, step_id: String },

    #[error("unknown measurement '{measurement_id}' in run {run_id}")]
    UnknownMeasurement {
        run_id: String,
        measurement_id: String,
    },

    #[error("run {run_id} is bound to protocol {expected}, got {actual}")]
    ProtocolMismatch {
        run_id: String,
        expected: String,
        actual: String,
    },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("invalid measurement for '{parameter}': {reason}")]
    InvalidMeasurement { parameter: String, reason: String },

    #[error("no action handler for action '{action}' (step '{step_id}')")]
    UnknownAction { step_id: String, action: String },

    #[error("lock poisoned for run {0}")]
    LockPoisoned(String),
}

impl EngineError {
    pub(crate) fn transition(
        entity: &'static str,
        id: impl Into<String>,
        from: impl ToString,
        action: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            id: id.into(),
            from: from.to_string(),
            action,
            reason: reason.into(),
        }
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML: {0}")]
    Parse(String),

    #[error("unsupported config version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("invalid config: {0}")]
    Invalid(String),
}
