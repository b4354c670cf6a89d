//! Error kinds surfaced to callers of a tool invocation.
//!
//! Every variant ends up inside an [`InvocationResult`] rather than being
//! propagated across the MCP boundary, so each one carries enough detail for
//! the caller to act on it.
//!
//! [`InvocationResult`]: crate::normalize::InvocationResult

use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, strum::IntoStaticStr)]
pub enum ToolError {
    #[error("unknown tool `{name}`")]
    ToolNotFound { name: String },

    #[error("missing required argument `{field}`")]
    MissingArgument { field: String },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("unexpected argument `{field}`")]
    UnexpectedArgument { field: String },

    #[error("failed to spawn `{program}`: {reason}")]
    ProcessSpawnFailure { program: String, reason: String },

    #[error("process timed out after {}s", .limit.as_secs_f64())]
    Timeout { limit: Duration },

    #[error("invocation was cancelled")]
    Cancelled,

    #[error("{}", exit_message(.code, .excerpt))]
    NonZeroExit { code: Option<i32>, excerpt: String },

    #[error("could not parse output: {reason}")]
    OutputParseFailure { reason: String },
}

fn exit_message(code: &Option<i32>, excerpt: &str) -> String {
    let status = match code {
        Some(code) => format!("process exited with status {code}"),
        None => "process was terminated by a signal".to_string(),
    };
    if excerpt.is_empty() {
        status
    } else {
        format!("{status}: {excerpt}")
    }
}

impl ToolError {
    /// Stable kind name, e.g. `MissingArgument`.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    /// The argument this error refers to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingArgument { field }
            | Self::InvalidArgument { field, .. }
            | Self::UnexpectedArgument { field } => Some(field),
            _ => None,
        }
    }

    /// Process exit code used by the `tool` subcommand.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NonZeroExit { .. } => 1,
            Self::MissingArgument { .. }
            | Self::InvalidArgument { .. }
            | Self::UnexpectedArgument { .. } => 2,
            Self::ToolNotFound { .. } => 3,
            Self::OutputParseFailure { .. } => 65,
            Self::Timeout { .. } => 124,
            Self::ProcessSpawnFailure { .. } => 127,
            Self::Cancelled => 130,
        }
    }

    /// Whether the error was raised before any process was spawned.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound { .. }
                | Self::MissingArgument { .. }
                | Self::InvalidArgument { .. }
                | Self::UnexpectedArgument { .. }
        )
    }
}

/// Serializable view of a [`ToolError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl From<&ToolError> for ErrorReport {
    fn from(error: &ToolError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            field: error.field().map(str::to_string),
        }
    }
}

/// Exit code for failures outside the invocation itself (config, I/O).
pub const INTERNAL_ERROR_EXIT_CODE: i32 = 70;
