//! Cleanup error types.

use thiserror::Error;

use reimage_fleet::FleetError;

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("generations to keep must be at least 1")]
    NoGenerations,

    #[error("{context}")]
    Fleet {
        context: String,
        #[source]
        source: FleetError,
    },
}

impl PruneError {
    /// Wrap a collaborator error with the operation that failed.
    pub fn fleet(context: impl Into<String>) -> impl FnOnce(FleetError) -> Self {
        let context = context.into();
        move |source| match source {
            FleetError::NotFound(what) => Self::NotFound(what),
            source => Self::Fleet { context, source },
        }
    }
}

pub type PruneResult<T> = Result<T, PruneError>;
