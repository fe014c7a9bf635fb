//! Error types for the simulation core

use crate::body::BodyHandle;
use crate::layers::ObjectLayer;
use thiserror::Error;

/// Simulation errors
#[derive(Debug, Error)]
pub enum PhysicsError {
    /// Invalid settings passed at construction
    #[error("Invalid simulation configuration: {0}")]
    Configuration(String),

    /// Malformed shape passed to `create_body`
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    /// Handle refers to a destroyed body or to a disposed simulation
    #[error("Stale body handle: {0:?}")]
    StaleHandle(BodyHandle),

    /// Layer id registered twice
    #[error("Object layer {0:?} is already registered")]
    DuplicateLayer(ObjectLayer),

    /// Layer used before being registered or mapped to a broad-phase layer
    #[error("Object layer {0:?} is not registered or has no broad-phase mapping")]
    UnmappedLayer(ObjectLayer),

    /// The backend refused to build its world
    #[error("Physics backend failure: {0}")]
    Backend(String),

    /// `max_bodies` reached
    #[error("Body capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    /// Operation on a disposed simulation
    #[error("Simulation has been disposed")]
    Disposed,
}

impl PhysicsError {
    /// Whether this error only rejects the offending call.
    ///
    /// Setup-time errors (configuration, layers, backend) abort the owning
    /// scene's initialization instead.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidShape(_) | Self::StaleHandle(_) | Self::CapacityExceeded { .. }
        )
    }
}

/// Result type for simulation operations
pub type Result<T> = std::result::Result<T, PhysicsError>;
