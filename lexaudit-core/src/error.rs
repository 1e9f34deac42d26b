//! Error types for LexAudit operations
//!
//! Errors fall into three groups with different consequences for the caller:
//!
//! - **Construction errors** (`EmptyDecisionLog`, `UnorderedDecisions`,
//!   `InvalidDecision`) are fatal. A trace that cannot be built means the run's
//!   audit record cannot be trusted, so the run itself has failed.
//! - **Certification errors** come from the storage/certification layer
//!   (uncompleted traces, duplicate manifests, missing records).
//! - **Infrastructure errors** wrap serialization and I/O failures.
//!
//! Replay never produces an `AuditError`; its findings are reported as
//! divergences and warnings on the `ReplayResult`.
//!
//! # Example
//!
//! ```rust
//! use lexaudit_core::error::{AuditError, ErrorCategory};
//!
//! let err = AuditError::EmptyDecisionLog;
//! assert!(err.is_fatal());
//! assert_eq!(err.category(), ErrorCategory::Validation);
//! assert_eq!(err.error_code(), "EMPTY_DECISION_LOG");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for LexAudit operations
pub type Result<T> = std::result::Result<T, AuditError>;

/// Error category for grouping related errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Resource not found (404)
    NotFound,
    /// Input validation failed (400)
    Validation,
    /// Resource conflict (409)
    Conflict,
    /// Data integrity error (422)
    Integrity,
    /// Internal error (500)
    Internal,
    /// External dependency error, I/O or serialization (502)
    External,
}

/// Errors that can occur in LexAudit operations
#[derive(Error, Debug)]
pub enum AuditError {
    // ═══════════════════════════════════════════════════════════════════════
    // Construction errors (trace and decision invariants)
    // ═══════════════════════════════════════════════════════════════════════

    /// A trace was built without a single decision
    #[error("Execution trace has no decisions. Record at least one decision before build().")]
    EmptyDecisionLog,

    /// Decisions are not sorted by ascending timestamp
    #[error("Decisions are not in chronological order: decision {index} at {current} precedes decision {} at {previous}", .index.saturating_sub(1))]
    UnorderedDecisions {
        index: usize,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    /// A decision violates its construction invariants
    #[error("Invalid decision '{step_name}': {reason}")]
    InvalidDecision { step_name: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Certification and storage errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Trace has no completion timestamp and cannot be certified
    #[error("Trace '{trace_id}' is not completed. Aborted runs cannot be certified.")]
    TraceNotCompleted { trace_id: String },

    /// A manifest already binds this trace
    #[error("Manifest already exists for trace '{trace_id}'. A trace is certified at most once.")]
    ManifestAlreadyExists { trace_id: String },

    /// Trace with the given ID is not stored
    #[error("Trace not found: '{trace_id}'")]
    TraceNotFound { trace_id: String },

    /// No trace has been stored for the case
    #[error("No trace stored for case '{case_id}'")]
    NoTraceForCase { case_id: String },

    /// A trace with the same ID is already stored
    #[error("Trace already stored: '{trace_id}'. Stored traces are immutable.")]
    TraceAlreadyExists { trace_id: String },

    /// Manifest identifiers do not match the trace it is bound to
    #[error("Manifest binding mismatch for trace '{trace_id}': {reason}")]
    ManifestBindingMismatch { trace_id: String, reason: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Infrastructure errors (configuration, serialization, storage, I/O)
    // ═══════════════════════════════════════════════════════════════════════

    /// Configuration value is malformed
    #[error("Invalid configuration for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    /// JSON serialization or deserialization failed
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Storage backend lock is poisoned (panic occurred while holding lock)
    #[error("Storage backend lock poisoned. This is a bug; please report it.")]
    StorageLocked,

    /// I/O operation failed
    #[error("IO error: {message}")]
    IoError { message: String },

    /// Internal error that shouldn't happen
    #[error("Internal error: {reason}. This is a bug; please report it.")]
    InternalError { reason: String },
}

impl AuditError {
    /// Returns true for construction errors
    ///
    /// A fatal error means the surrounding run must be treated as failed.
    /// There is no partial or best-effort trace.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuditError::EmptyDecisionLog
                | AuditError::UnorderedDecisions { .. }
                | AuditError::InvalidDecision { .. }
        )
    }

    /// Returns true if this error might succeed on retry
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AuditError::StorageLocked | AuditError::IoError { .. })
    }

    /// Returns true if this error is a client error (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(self.http_status_code(), 400..=499)
    }

    /// Returns true if this error is a server error (5xx equivalent)
    pub fn is_server_error(&self) -> bool {
        matches!(self.http_status_code(), 500..=599)
    }

    /// Returns the error category for grouping
    pub fn category(&self) -> ErrorCategory {
        match self {
            AuditError::TraceNotFound { .. } | AuditError::NoTraceForCase { .. } => {
                ErrorCategory::NotFound
            }

            AuditError::EmptyDecisionLog
            | AuditError::UnorderedDecisions { .. }
            | AuditError::InvalidDecision { .. }
            | AuditError::InvalidConfig { .. } => ErrorCategory::Validation,

            AuditError::TraceNotCompleted { .. }
            | AuditError::ManifestAlreadyExists { .. }
            | AuditError::TraceAlreadyExists { .. } => ErrorCategory::Conflict,

            AuditError::ManifestBindingMismatch { .. } => ErrorCategory::Integrity,

            AuditError::StorageLocked | AuditError::InternalError { .. } => {
                ErrorCategory::Internal
            }

            AuditError::JsonError(_) | AuditError::IoError { .. } => ErrorCategory::External,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            AuditError::EmptyDecisionLog => "EMPTY_DECISION_LOG",
            AuditError::UnorderedDecisions { .. } => "UNORDERED_DECISIONS",
            AuditError::InvalidDecision { .. } => "INVALID_DECISION",
            AuditError::TraceNotCompleted { .. } => "TRACE_NOT_COMPLETED",
            AuditError::ManifestAlreadyExists { .. } => "MANIFEST_ALREADY_EXISTS",
            AuditError::TraceNotFound { .. } => "TRACE_NOT_FOUND",
            AuditError::NoTraceForCase { .. } => "NO_TRACE_FOR_CASE",
            AuditError::TraceAlreadyExists { .. } => "TRACE_ALREADY_EXISTS",
            AuditError::ManifestBindingMismatch { .. } => "MANIFEST_BINDING_MISMATCH",
            AuditError::InvalidConfig { .. } => "INVALID_CONFIG",
            AuditError::JsonError(_) => "JSON_ERROR",
            AuditError::StorageLocked => "STORAGE_LOCKED",
            AuditError::IoError { .. } => "IO_ERROR",
            AuditError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error
    ///
    /// For callers that expose the core behind an HTTP API.
    pub fn http_status_code(&self) -> u16 {
        match self {
            AuditError::EmptyDecisionLog
            | AuditError::UnorderedDecisions { .. }
            | AuditError::InvalidDecision { .. }
            | AuditError::InvalidConfig { .. } => 400,

            AuditError::TraceNotFound { .. } | AuditError::NoTraceForCase { .. } => 404,

            AuditError::TraceNotCompleted { .. }
            | AuditError::ManifestAlreadyExists { .. }
            | AuditError::TraceAlreadyExists { .. } => 409,

            AuditError::ManifestBindingMismatch { .. } => 422,

            AuditError::StorageLocked | AuditError::InternalError { .. } => 500,

            AuditError::JsonError(_) | AuditError::IoError { .. } => 502,
        }
    }

    /// Converts this error to a JSON-serializable response object
    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                category: self.category(),
                fatal: self.is_fatal(),
            },
        }
    }
}

impl From<std::io::Error> for AuditError {
    fn from(err: std::io::Error) -> Self {
        AuditError::IoError {
            message: err.to_string(),
        }
    }
}

/// JSON-serializable error response for APIs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Error detail for JSON responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Stable error code (e.g., "UNORDERED_DECISIONS")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Error category
    pub category: ErrorCategory,
    /// Whether the surrounding run must be treated as failed
    pub fatal: bool,
}
