//! reimage cleanup — the non-orchestrated maintenance workflows.
//!
//! - **`images`** — deregister images older than the newest N generations
//! - **`snapshots`** — delete snapshots no image or volume references
//!
//! Both thread `dry_run` into every mutating call and return a
//! [`PruneReport`].

pub mod error;
pub mod images;
pub mod report;
pub mod snapshots;

pub use error::{PruneError, PruneResult};
pub use images::{ImagePruneRequest, remove_images};
pub use report::{PruneReport, format_report};
pub use snapshots::remove_snapshots;
