//! Unified error hierarchy for coachrs
//!
//! A flagged plan is not an error: risk is reported through a `RiskVerdict`.
//! Errors here are the three caller-facing failure classes (validation,
//! conflict, generation) plus infrastructure failures.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::PlanState;

/// Top-level error type for all coachrs operations
#[derive(Debug, Error)]
pub enum CoachError {
    /// Malformed input data; rejected, never retried
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Concurrent-write race or stale state; re-read and retry
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// External plan generator failed; nothing was recorded
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Storage backend errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Broken invariant inside the core
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Field-level validation failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Write races and invalid lifecycle transitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// The active plan changed between read and write
    #[error("active plan changed: expected {expected:?}, found {actual:?}")]
    ActivePlanChanged {
        expected: Option<Uuid>,
        actual: Option<Uuid>,
    },

    /// Another write for the same user is in flight
    #[error("another write is in progress for user {user_id}")]
    UserBusy { user_id: String },

    /// The proposal is not in a state that accepts this action
    #[error("plan {plan_id} cannot {action} from state {from:?}")]
    InvalidTransition {
        plan_id: Uuid,
        from: PlanState,
        action: String,
    },

    /// The approval window closed before the decision arrived; the proposal is rejected
    #[error("plan {plan_id} has been pending since {pending_since} and is past its approval window")]
    ApprovalExpired {
        plan_id: Uuid,
        pending_since: DateTime<Utc>,
    },

    /// The proposal does not exist (anymore) for this user
    #[error("plan {plan_id} not found for user {user_id}")]
    ProposalNotFound { user_id: String, plan_id: Uuid },
}

/// Failures of the external plan generator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Generator unreachable or returned an error
    #[error("generator unavailable: {reason}")]
    Unavailable { reason: String },

    /// Generator did not answer within the configured bound
    #[error("generator timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// Reply was not valid JSON for the schedule contract
    #[error("unparsable schedule: {reason}")]
    Unparsable { reason: String },

    /// Reply parsed but violates the schedule schema
    #[error("schedule schema violation in {field}: {reason}")]
    SchemaViolation { field: String, reason: String },
}

/// Storage errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Record not found: {table}.{id}")]
    NotFound { table: String, id: String },

    #[error("Store lock poisoned")]
    Poisoned,
}

/// Result type alias for coachrs operations
pub type Result<T> = std::result::Result<T, CoachError>;

impl CoachError {
    /// Shortcut for a field-level validation failure
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CoachError::Validation(ValidationError::new(field, reason))
    }

    /// Check if the caller may retry (after re-reading state where relevant)
    pub fn is_retryable(&self) -> bool {
        match self {
            CoachError::Conflict(ConflictError::ApprovalExpired { .. }) => false,
            CoachError::Conflict(_) | CoachError::Generation(_) | CoachError::Io(_) => true,
            _ => false,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CoachError::Validation(_) => ErrorSeverity::Warning,
            CoachError::Conflict(_) => ErrorSeverity::Warning,
            CoachError::Generation(_) => ErrorSeverity::Error,
            CoachError::Database(_) => ErrorSeverity::Error,
            CoachError::Configuration(_) => ErrorSeverity::Error,
            CoachError::Io(_) => ErrorSeverity::Error,
            CoachError::Internal(_) => ErrorSeverity::Critical,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            CoachError::Validation(e) => {
                format!("Please check the value for '{}': {}", e.field, e.reason)
            }
            CoachError::Conflict(ConflictError::UserBusy { .. }) => {
                "Another change is being applied to your plan. Please try again.".to_string()
            }
            CoachError::Conflict(ConflictError::ApprovalExpired { .. }) => {
                "This plan waited too long for a decision and has been rejected. Request a new plan."
                    .to_string()
            }
            CoachError::Conflict(_) => {
                "Your plan changed in the meantime. Please review the current state and retry."
                    .to_string()
            }
            CoachError::Generation(_) => {
                "The plan generator is not available right now. No plan was created; try again later."
                    .to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<rusqlite::Error> for CoachError {
    fn from(e: rusqlite::Error) -> Self {
        CoachError::Database(DatabaseError::Sqlite(e))
    }
}

impl From<serde_json::Error> for CoachError {
    fn from(e: serde_json::Error) -> Self {
        CoachError::Database(DatabaseError::Serialization(e))
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}
