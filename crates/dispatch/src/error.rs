//! Dispatch error taxonomy
//!
//! Callers translate [`DispatchError::NotFound`] to a 404-style response and
//! [`DispatchError::PreconditionFailed`] to a 400-style response. Store
//! failures are kept separate so they never masquerade as client errors.

use thiserror::Error;

/// Errors raised by the durable stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record body could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An assignment already exists for this (task, responder) pair
    #[error("Duplicate assignment: task={task_id}, responder={responder_id}")]
    DuplicateAssignment {
        /// Task identifier
        task_id: String,
        /// Responder identifier
        responder_id: String,
    },

    /// Stored version differs from the one the update was based on
    #[error("Version conflict on {entity} {id}: expected version {expected}")]
    VersionConflict {
        /// Record kind
        entity: &'static str,
        /// Record identifier
        id: String,
        /// Version the caller read
        expected: u64,
    },

    /// Update targeted a record that does not exist
    #[error("Record not found: {entity} {id}")]
    Missing {
        /// Record kind
        entity: &'static str,
        /// Record identifier
        id: String,
    },

    /// A store mutex was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// IO error while preparing the database location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by dispatch operations
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Task or assignment does not exist
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Record kind ("task" or "assignment")
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Operation attempted from an illegal current state
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Record kept changing underneath the operation
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Durable store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        DispatchError::PreconditionFailed(message.into())
    }

    pub(crate) fn task_not_found(task_id: &str) -> Self {
        DispatchError::NotFound {
            entity: "task",
            id: task_id.to_string(),
        }
    }

    pub(crate) fn assignment_not_found(task_id: &str, responder_id: &str) -> Self {
        DispatchError::NotFound {
            entity: "assignment",
            id: format!("{}/{}", task_id, responder_id),
        }
    }

    /// Check if this is a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::NotFound { .. })
    }

    /// Check if this is an illegal-state condition
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, DispatchError::PreconditionFailed(_))
    }
}

/// Result alias for dispatch operations
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
