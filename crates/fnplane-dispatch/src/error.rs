// Copyright (C) 2025 The fnplane Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for fnplane-dispatch.

use fnplane_store::StoreError;
use serde_json::{Value, json};
use thiserror::Error;

/// Dispatch errors.
///
/// Every variant maps to one HTTP status and one machine-readable code.
/// [`Dispatcher::dispatch`](crate::Dispatcher::dispatch) never returns these
/// directly; they are rendered into a [`DispatchResult`](crate::DispatchResult).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    /// Function, version or code does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Required backend is not configured.
    #[error("{0}")]
    Unavailable(String),

    /// Tier deadline elapsed.
    #[error("{0}")]
    Timeout(String),

    /// Executor or backend failed.
    #[error("{0}")]
    ExecutionFailed(String),

    /// Function type is not recognized.
    #[error("{0}")]
    UnknownType(String),

    /// Request rejected by a security rule.
    #[error("{0}")]
    SecurityPolicy(String),

    /// Metadata or input is unusable.
    #[error("{0}")]
    InvalidInput(String),
}

impl DispatchError {
    /// HTTP status for this error.
    pub fn status(&self) -> u16 {
        match self {
            DispatchError::NotFound(_) => 404,
            DispatchError::Unavailable(_) => 503,
            DispatchError::Timeout(_) => 408,
            DispatchError::ExecutionFailed(_) => 500,
            DispatchError::UnknownType(_) => 501,
            DispatchError::SecurityPolicy(_) => 403,
            DispatchError::InvalidInput(_) => 400,
        }
    }

    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            DispatchError::NotFound(_) => "NOT_FOUND",
            DispatchError::Unavailable(_) => "UNAVAILABLE",
            DispatchError::Timeout(_) => "TIMEOUT",
            DispatchError::ExecutionFailed(_) => "EXECUTION_FAILED",
            DispatchError::UnknownType(_) => "UNKNOWN_TYPE",
            DispatchError::SecurityPolicy(_) => "SECURITY_POLICY",
            DispatchError::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// Error body: `{"error": message, "code": CODE}`.
    pub fn to_body(&self) -> Value {
        json!({
            "error": self.to_string(),
            "code": self.error_code(),
        })
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionNotFound { .. } => DispatchError::NotFound(err.to_string()),
            StoreError::InvalidId { .. } | StoreError::InvalidVersion { .. } => {
                DispatchError::InvalidInput(err.to_string())
            }
            other => DispatchError::ExecutionFailed(format!("Storage error: {}", other)),
        }
    }
}

/// Errors from backend (sandbox, AI, task queue) calls.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Backend cannot serve requests right now.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Request reached the backend and failed.
    #[error("{0}")]
    Request(String),

    /// Call was cancelled.
    #[error("Call cancelled")]
    Cancelled,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Errors from tool handlers.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ToolError {
    /// Tool refused by policy; nothing was executed.
    #[error("Security policy violation: {0}")]
    SecurityPolicy(String),

    /// Target function does not exist.
    #[error("Function not found: {0}")]
    NotFound(String),

    /// Target function ran and returned an error status.
    #[error("Function {function_id} failed with status {status}: {message}")]
    Failed {
        /// Function that failed.
        function_id: String,
        /// Status it returned.
        status: u16,
        /// Error message from its body.
        message: String,
    },

    /// HTTP endpoint answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// HTTP request could not be made.
    #[error("Request failed: {0}")]
    Request(String),

    /// Call was cancelled.
    #[error("Tool call cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_mapping() {
        let cases = [
            (DispatchError::NotFound("x".into()), 404, "NOT_FOUND"),
            (DispatchError::Unavailable("x".into()), 503, "UNAVAILABLE"),
            (DispatchError::Timeout("x".into()), 408, "TIMEOUT"),
            (DispatchError::ExecutionFailed("x".into()), 500, "EXECUTION_FAILED"),
            (DispatchError::UnknownType("x".into()), 501, "UNKNOWN_TYPE"),
            (DispatchError::SecurityPolicy("x".into()), 403, "SECURITY_POLICY"),
            (DispatchError::InvalidInput("x".into()), 400, "INVALID_INPUT"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status(), status);
            assert_eq!(err.error_code(), code);
        }
    }

    #[test]
    fn test_error_body() {
        let body = DispatchError::NotFound("Function code not found".into()).to_body();
        assert_eq!(
            body,
            json!({"error": "Function code not found", "code": "NOT_FOUND"})
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: DispatchError = StoreError::VersionNotFound {
            id: "f".into(),
            version: "1.0.0".into(),
        }
        .into();
        assert_eq!(err.status(), 404);
    }
}
