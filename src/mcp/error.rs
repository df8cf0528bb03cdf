use serde_json::{json, Value};

use super::protocol::{error_codes, ErrorObject};

/// Classification used by the resilience layer to decide retry and circuit behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input. Never retried.
    Validation,
    /// A tool ran and failed. Retried.
    Execution,
    /// A downstream hiccup (network, timeout). Retried.
    Transient,
    /// Circuit open or internal fault. Never retried.
    Systemic,
}

/// Errors produced by the protocol core and by tool implementations
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool '{0}' requires elevated privileges")]
    PrivilegeRequired(String),

    #[error("Tool '{tool}' failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: Box<McpError>,
    },

    #[error("{0}")]
    Transient(String),

    #[error("{0} is temporarily unavailable")]
    TemporarilyUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Parse(_)
            | Self::InvalidRequest(_)
            | Self::InvalidArgument(_)
            | Self::MethodNotFound(_)
            | Self::InvalidParams(_)
            | Self::ToolNotFound(_)
            | Self::InvalidParameters(_)
            | Self::PrivilegeRequired(_) => ErrorKind::Validation,
            Self::ToolExecution { .. } => ErrorKind::Execution,
            Self::Transient(_) => ErrorKind::Transient,
            Self::TemporarilyUnavailable(_) | Self::Internal(_) => ErrorKind::Systemic,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Execution | ErrorKind::Transient)
    }

    /// Failures a client should see as a tool result with `isError: true`
    /// rather than as a protocol-level error.
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound(_)
                | Self::InvalidParameters(_)
                | Self::PrivilegeRequired(_)
                | Self::ToolExecution { .. }
        )
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::InvalidRequest(_) => error_codes::INVALID_REQUEST,
            Self::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) | Self::InvalidParameters(_) | Self::InvalidArgument(_) => {
                error_codes::INVALID_PARAMS
            }
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
            Self::ToolExecution { .. } | Self::Transient(_) => error_codes::TOOL_EXECUTION_ERROR,
            Self::ToolNotFound(_) => error_codes::TOOL_NOT_FOUND,
            Self::PrivilegeRequired(_) => error_codes::PRIVILEGE_REQUIRED,
            Self::TemporarilyUnavailable(_) => error_codes::TEMPORARILY_UNAVAILABLE,
        }
    }

    /// Symbolic name of the error code, as surfaced in structured tool results.
    pub fn code_name(&self) -> &'static str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::MethodNotFound(_) => "METHOD_NOT_FOUND",
            Self::InvalidParams(_) | Self::InvalidParameters(_) | Self::InvalidArgument(_) => {
                "INVALID_PARAMS"
            }
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::ToolExecution { .. } | Self::Transient(_) => "TOOL_EXECUTION_ERROR",
            Self::ToolNotFound(_) => "TOOL_NOT_FOUND",
            Self::PrivilegeRequired(_) => "PRIVILEGE_REQUIRED",
            Self::TemporarilyUnavailable(_) => "TEMPORARILY_UNAVAILABLE",
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            Self::ToolNotFound(name) | Self::PrivilegeRequired(name) => {
                Some(json!({ "tool": name }))
            }
            Self::ToolExecution { tool, source } => Some(json!({
                "tool": tool,
                "cause": source.to_string(),
            })),
            Self::TemporarilyUnavailable(component) => Some(json!({ "component": component })),
            _ => None,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject::new(self.code(), self.to_string(), self.data())
    }
}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("serialization failed: {}", err))
    }
}
