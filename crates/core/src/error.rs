//! Error types and recovery strategies for Lotkeeper
//!
//! Errors are classified into three severity tiers:
//! - **Recoverable**: retried automatically (transient remote failures)
//! - **Degraded**: the operation is rejected but the app continues (validation, duplicates)
//! - **Fatal**: requires operator intervention (migration failure, internal error)
//!
//! Each error carries a recovery action to guide automatic handling in the sync engine.

use std::fmt;
use std::io;
use thiserror::Error;

/// Recovery actions that can be taken when an error occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry the operation immediately
    RetryImmediate,
    /// Retry with exponential backoff (remote temporarily unavailable)
    RetryWithBackoff,
    /// Reject the request and report it to the caller
    Reject,
    /// Attempt to repair the database and retry
    RepairDatabase,
    /// Hand the record to an operator for manual resolution
    ManualResolution,
    /// No automatic recovery - user intervention required
    UserIntervention,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryImmediate => write!(f, "Retrying immediately"),
            Self::RetryWithBackoff => write!(f, "Retrying with backoff"),
            Self::Reject => write!(f, "Rejecting request"),
            Self::RepairDatabase => write!(f, "Repairing database"),
            Self::ManualResolution => write!(f, "Awaiting manual resolution"),
            Self::UserIntervention => write!(f, "User intervention required"),
        }
    }
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Error can be automatically recovered from
    Recoverable,
    /// Request rejected but the app can continue
    Degraded,
    /// Critical error requiring restart or operator action
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable => write!(f, "Recoverable"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Fatal => write!(f, "Fatal"),
        }
    }
}

/// Main error type for Lotkeeper
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Record Errors =====
    /// An entry with the same natural key already exists
    #[error("Duplicate key: {natural_key}")]
    DuplicateKey { natural_key: String },

    /// Entry, operation or conflict not found
    #[error("Record not found: {entity} with {identifier}")]
    RecordNotFound { entity: String, identifier: String },

    /// Business validation rejected the record
    #[error("Validation failed: {}", errors.join("; "))]
    ValidationFailed { errors: Vec<String> },

    /// Argument outside the accepted domain
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // ===== Remote Errors =====
    /// Remote call failed but may succeed later
    #[error("Transient remote failure during {operation}: {message}")]
    TransientRemoteFailure { operation: String, message: String },

    /// Remote rejected the request; retrying will not help
    #[error("Permanent remote failure during {operation}: {message}")]
    PermanentRemoteFailure { operation: String, message: String },

    /// Divergent local and remote versions await manual resolution
    #[error("Unresolved conflict {conflict_id} for entry {entry_id}")]
    ConflictUnresolved {
        entry_id: String,
        conflict_id: String,
    },

    // ===== Storage Errors =====
    /// Database operation failed
    #[error("Database error: {message}")]
    DatabaseError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database migration failed
    #[error("Migration failed: {version} - {reason}")]
    MigrationFailed { version: String, reason: String },

    /// Snapshot or payload (de)serialization failed
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// General I/O error
    #[error("I/O error: {message}")]
    IoError {
        message: String,
        #[source]
        source: io::Error,
    },

    // ===== Configuration/Internal Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {setting} ({reason})")]
    InvalidConfiguration { setting: String, reason: String },

    /// Internal invariant violated
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl AppError {
    /// Returns the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::TransientRemoteFailure { .. } => ErrorSeverity::Recoverable,

            Self::DuplicateKey { .. }
            | Self::RecordNotFound { .. }
            | Self::ValidationFailed { .. }
            | Self::InvalidArgument { .. }
            | Self::PermanentRemoteFailure { .. }
            | Self::ConflictUnresolved { .. }
            | Self::SerializationError { .. }
            | Self::DatabaseError { .. }
            | Self::IoError { .. } => ErrorSeverity::Degraded,

            Self::MigrationFailed { .. }
            | Self::InvalidConfiguration { .. }
            | Self::InternalError { .. } => ErrorSeverity::Fatal,
        }
    }

    /// Returns the recommended recovery action for this error
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::TransientRemoteFailure { .. } => RecoveryAction::RetryWithBackoff,

            Self::DuplicateKey { .. }
            | Self::RecordNotFound { .. }
            | Self::ValidationFailed { .. }
            | Self::InvalidArgument { .. }
            | Self::PermanentRemoteFailure { .. }
            | Self::SerializationError { .. } => RecoveryAction::Reject,

            Self::ConflictUnresolved { .. } => RecoveryAction::ManualResolution,

            Self::DatabaseError { .. } | Self::MigrationFailed { .. } => {
                RecoveryAction::RepairDatabase
            }

            Self::IoError { .. }
            | Self::InvalidConfiguration { .. }
            | Self::InternalError { .. } => RecoveryAction::UserIntervention,
        }
    }

    /// Returns a user-friendly error message (no technical jargon)
    pub fn user_message(&self) -> String {
        match self {
            Self::DuplicateKey { .. } => {
                "This vehicle already has an entry at that time.".to_string()
            }
            Self::RecordNotFound { entity, .. } => format!("The requested {} was not found.", entity),
            Self::ValidationFailed { errors } => {
                format!("Please correct the entry: {}", errors.join("; "))
            }
            Self::InvalidArgument { message } => format!("Invalid input: {}", message),
            Self::TransientRemoteFailure { .. } => {
                "Could not reach the server. Changes are saved and will sync later.".to_string()
            }
            Self::PermanentRemoteFailure { .. } => {
                "The server rejected a change. An operator needs to review it.".to_string()
            }
            Self::ConflictUnresolved { .. } => {
                "This entry was changed elsewhere. Please choose which version to keep."
                    .to_string()
            }
            Self::DatabaseError { .. } | Self::MigrationFailed { .. } => {
                "A problem occurred with the local database.".to_string()
            }
            Self::SerializationError { .. } => "The data could not be read.".to_string(),
            Self::IoError { .. } => "A file operation failed.".to_string(),
            Self::InvalidConfiguration { setting, .. } => {
                format!("The setting '{}' is invalid.", setting)
            }
            Self::InternalError { .. } => {
                "An unexpected error occurred. Please try again.".to_string()
            }
        }
    }

    /// Returns true if this error should be logged at ERROR level
    pub fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }

    /// Returns true if this error can be automatically retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.recovery_action(),
            RecoveryAction::RetryImmediate | RecoveryAction::RetryWithBackoff
        )
    }

    /// Helper to create a database error from any error type
    pub fn database<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Helper for a missing entity
    pub fn not_found(entity: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::RecordNotFound {
            entity: entity.into(),
            identifier: identifier.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Convenience type alias for Results using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            message: err.to_string(),
        }
    }
}
