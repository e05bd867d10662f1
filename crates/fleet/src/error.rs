//! Fleet engine error taxonomy

use thiserror::Error;

use crate::mission::MissionStatus;

/// Errors returned by fleet operations.
///
/// Every error is scoped to the single request that produced it; none of
/// them leaves partially written state behind.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Missing or out-of-range input
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown identifier
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Requested identifier
        id: i64,
    },

    /// No principal was supplied
    #[error("Authentication required")]
    Unauthenticated,

    /// Role or ownership mismatch
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Delete blocked by a referencing record
    #[error("Referential conflict: {0}")]
    ReferentialConflict(String),

    /// Reservation refused because another active mission holds the resource
    #[error("{resource} {id} is already committed to active mission {mission_id}")]
    ResourceBusy {
        /// Resource kind ("drone" or "pilot")
        resource: &'static str,
        /// Resource identifier
        id: i64,
        /// Active mission holding it
        mission_id: i64,
    },

    /// Status change outside the mission transition graph
    #[error("Invalid mission transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: MissionStatus,
        /// Requested status
        to: MissionStatus,
    },

    /// Storage failure
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem failure while opening the store
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        FleetError::NotFound { entity, id }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        FleetError::Validation(msg.into())
    }

    /// Transport status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            FleetError::Validation(_) | FleetError::InvalidTransition { .. } => 400,
            FleetError::Unauthenticated => 401,
            FleetError::Forbidden(_) => 403,
            FleetError::NotFound { .. } => 404,
            FleetError::ReferentialConflict(_) | FleetError::ResourceBusy { .. } => 409,
            FleetError::Database(_) | FleetError::Io(_) => 500,
        }
    }
}

/// Result alias for fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;
