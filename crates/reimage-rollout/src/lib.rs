//! reimage rollout engine — move a container cluster onto a new machine image.
//!
//! Replaces nodes running an outdated image without dropping capacity:
//! idle outdated nodes are stopped first, one node of headroom is added
//! when none is free, busy nodes are drained and swapped concurrently, and
//! the group is returned to its starting size.
//!
//! # Components
//!
//! - **`backoff`** — exponential-backoff polling with long and short profiles
//! - **`classifier`** — partition cluster nodes into in-place, unused, and free
//! - **`capacity`** — resize the scaling group and wait for convergence
//! - **`deploy`** — the closed/running deployment state machine
//! - **`stop`** — stop nodes and wait for the group to heal
//! - **`swap`** — concurrent drain/stop/resettle of in-place nodes
//! - **`replacer`** — the top-level run and its `RunReport`

pub mod backoff;
pub mod capacity;
pub mod classifier;
pub mod context;
pub mod deploy;
pub mod error;
pub mod replacer;
pub mod report;
pub mod stop;
pub mod swap;
pub mod target;

#[cfg(test)]
mod testing;

pub use backoff::{Backoff, BackoffProfiles};
pub use context::RunContext;
pub use deploy::{DeployEvent, DeployState, Deployment, InvalidTransition};
pub use error::{ReplaceError, ReplaceResult};
pub use replacer::{ReplaceRequest, Replacer};
pub use report::{RunReport, format_report};
