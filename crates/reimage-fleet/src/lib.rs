//! reimage-fleet — the fleet model shared by every reimage crate.
//!
//! Defines the narrow collaborator interfaces the engine consumes
//! (scaling group, compute, container cluster, images), the records they
//! return, and the classified snapshot records (`Node`, `Cluster`,
//! `ScalingGroupRef`) the rollout engine passes between its steps.
//!
//! # Components
//!
//! - **`client`** — async collaborator traits and the `Clients` bundle
//! - **`types`** — descriptions and snapshot records
//! - **`memory`** — `MemoryFleet`, a simulated provider for tests and rehearsals

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{ClusterClient, Clients, ComputeClient, ImageClient, ScalingGroupClient};
pub use error::{FleetError, FleetResult};
pub use memory::{Call, FleetSpec, MemoryFleet, Operation};
pub use types::*;
