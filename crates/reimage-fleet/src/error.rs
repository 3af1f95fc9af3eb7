//! Error types for fleet collaborators.

use thiserror::Error;

/// Result type alias for collaborator calls.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors a scaling-group, compute, cluster, or image client can return.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("api error: {0}")]
    Api(String),
}
