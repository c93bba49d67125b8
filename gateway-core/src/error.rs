//! Error types for gateway-core.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Result type alias using gateway-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable discriminator for [`Error`], carried onto the wire in
/// `ExecuteResponse` error bodies (`{kind, message, details?}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    CodeTooLarge,
    NoDag,
    NotFound,
    Collision,
    InvalidName,
    StateViolation,
    ToolUnavailable,
    Timeout,
    ApprovalRejected,
    ExecutorCrash,
    TrainingBusy,
    Internal,
}

/// Errors that can occur during gateway operations.
///
/// Every variant maps to one [`ErrorKind`] via [`Error::kind`], matching the
/// error taxonomy of the execute handler's wire contract.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or mutually-exclusive `ExecuteArgs` input.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Submitted code exceeds the configured size limit.
    #[error("code too large: {size} bytes exceeds limit of {limit} bytes")]
    CodeTooLarge { size: usize, limit: usize },

    /// Code parsed but produced no task nodes.
    #[error("code parsed but yielded no tool-call DAG")]
    NoDag,

    /// A registry/checkpoint/workflow lookup found nothing.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// A registry create/rename conflicted with an existing record.
    #[error("collision: {message}")]
    Collision { message: String },

    /// An identifier failed the identifier grammar.
    #[error("invalid name: {name}")]
    InvalidName { name: String },

    /// A workflow control command is illegal from the current state.
    #[error("state violation: cannot apply {command} while workflow is {state}")]
    StateViolation { state: String, command: String },

    /// A referenced tool or provider is not registered/reachable.
    #[error("tool unavailable: {tool_id}")]
    ToolUnavailable { tool_id: String },

    /// A per-task or per-workflow deadline was exceeded.
    #[error("operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// `continue_workflow` arrived with `approved = false`.
    #[error("approval rejected for checkpoint {checkpoint_id}")]
    ApprovalRejected { checkpoint_id: String },

    /// An internal invariant was broken inside the executor.
    #[error("executor crash: {message}")]
    ExecutorCrash { message: String },

    /// A training request arrived while another was already in progress.
    ///
    /// Non-fatal: callers should drop the request, never propagate it as a
    /// user-visible failure.
    #[error("training busy, request dropped")]
    TrainingBusy,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sqlite-backed store error (registry, trace store, checkpoints, counters).
    #[error("store error: {0}")]
    Store(String),

    /// Anything else that does not fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable discriminator for this error, per spec.md §7.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::CodeTooLarge { .. } => ErrorKind::CodeTooLarge,
            Self::NoDag => ErrorKind::NoDag,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Collision { .. } => ErrorKind::Collision,
            Self::InvalidName { .. } => ErrorKind::InvalidName,
            Self::StateViolation { .. } => ErrorKind::StateViolation,
            Self::ToolUnavailable { .. } => ErrorKind::ToolUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ApprovalRejected { .. } => ErrorKind::ApprovalRejected,
            Self::ExecutorCrash { .. } => ErrorKind::ExecutorCrash,
            Self::TrainingBusy => ErrorKind::TrainingBusy,
            Self::Serialization(_) | Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Structured `details` payload for the wire response, if any.
    pub fn details(&self) -> Option<Value> {
        None
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn code_too_large(size: usize, limit: usize) -> Self {
        Self::CodeTooLarge { size, limit }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn collision(message: impl Into<String>) -> Self {
        Self::Collision {
            message: message.into(),
        }
    }

    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName { name: name.into() }
    }

    pub fn state_violation(state: impl Into<String>, command: impl Into<String>) -> Self {
        Self::StateViolation {
            state: state.into(),
            command: command.into(),
        }
    }

    pub fn tool_unavailable(tool_id: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool_id: tool_id.into(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    pub fn approval_rejected(checkpoint_id: impl Into<String>) -> Self {
        Self::ApprovalRejected {
            checkpoint_id: checkpoint_id.into(),
        }
    }

    pub fn executor_crash(message: impl Into<String>) -> Self {
        Self::ExecutorCrash {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}
