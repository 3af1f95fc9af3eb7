//! Rollout error types.

use std::time::Duration;

use thiserror::Error;

use reimage_fleet::FleetError;

use crate::deploy::InvalidTransition;

/// Errors that abort a replacement run.
#[derive(Debug, Error)]
pub enum ReplaceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("cluster {cluster} already runs {image} on every active node")]
    AlreadyConverged { cluster: String, image: String },

    #[error("{what} did not converge after {attempts} attempts in {elapsed:?}: {last_error}")]
    TimedOut {
        what: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    #[error("{what} cancelled by shutdown")]
    Cancelled { what: String },

    #[error("deployment state: {0}")]
    InvalidTransition(#[from] InvalidTransition),

    #[error("cluster is not steady state")]
    NotSteadyState {
        #[source]
        cause: Option<Box<ReplaceError>>,
    },

    #[error("cluster {0} has no empty instances")]
    NoEmptyInstances(String),

    #[error("group {group} cannot be sized to {target} (min {min}, max {max})")]
    CapacityCeiling {
        group: String,
        target: usize,
        min: u32,
        max: u32,
    },

    #[error("swap task aborted: {0}")]
    UnitAborted(String),

    #[error("{context}")]
    Fleet {
        context: String,
        #[source]
        source: FleetError,
    },
}

impl ReplaceError {
    /// Build a mapper that wraps a collaborator error with operation context.
    ///
    /// A missing resource stays `NotFound`; everything else keeps the
    /// collaborator error as its source.
    pub fn fleet(context: impl Into<String>) -> impl FnOnce(FleetError) -> Self {
        let context = context.into();
        move |source| match source {
            FleetError::NotFound(what) => Self::NotFound(what),
            source => Self::Fleet { context, source },
        }
    }
}

pub type ReplaceResult<T> = Result<T, ReplaceError>;
