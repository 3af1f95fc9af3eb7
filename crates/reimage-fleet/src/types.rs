//! Domain types shared by the rollout engine and the cleanup workflows.
//!
//! Two families live here: the raw descriptions returned by collaborator
//! clients (groups, instances, registrations, images), and the snapshot
//! records the engine builds from them (`Node`, `ScalingGroupRef`,
//! `Cluster`). Snapshot records are rebuilt on every query and never
//! patched in place.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Compute instance identifier (`i-...`).
pub type InstanceId = String;

/// Machine image identifier (`ami-...`).
pub type ImageId = String;

// ── Scaling group ──────────────────────────────────────────────────

/// One member of a scaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub instance_id: InstanceId,
    pub protected_from_scale_in: bool,
}

/// Observed state of a scaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescription {
    pub name: String,
    pub desired: u32,
    pub min_size: u32,
    pub max_size: u32,
    /// Whether newly launched members start scale-in protected.
    pub protect_new: bool,
    pub members: Vec<GroupMember>,
}

impl GroupDescription {
    /// Number of member instances.
    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, instance_id: &str) -> bool {
        self.members.iter().any(|m| m.instance_id == instance_id)
    }
}

/// Requested scaling-group sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub desired: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub protect_new: bool,
}

/// The launch template version an instance was launched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchTemplateRef {
    pub template_id: String,
    pub version: String,
}

// ── Compute ────────────────────────────────────────────────────────

/// Lifecycle state of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    /// Numeric state code as reported by the compute API.
    pub fn code(self) -> u16 {
        match self {
            Self::Pending => 0,
            Self::Running => 16,
            Self::ShuttingDown => 32,
            Self::Terminated => 48,
            Self::Stopping => 64,
            Self::Stopped => 80,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Pending),
            16 => Some(Self::Running),
            32 => Some(Self::ShuttingDown),
            48 => Some(Self::Terminated),
            64 => Some(Self::Stopping),
            80 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Stopped or terminated: the instance no longer runs anything.
    pub fn is_halted(self) -> bool {
        matches!(self, Self::Stopped | Self::Terminated)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance_id: InstanceId,
    pub availability_zone: String,
    pub state: InstanceState,
}

// ── Cluster registration ───────────────────────────────────────────

/// Registration status of a node in the container cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    #[default]
    Active,
    Draining,
    Inactive,
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Active => "ACTIVE",
            Self::Draining => "DRAINING",
            Self::Inactive => "INACTIVE",
        };
        f.write_str(label)
    }
}

/// Registration record of a node as reported by the cluster API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub instance_id: InstanceId,
    pub arn: String,
    pub status: RegistrationStatus,
    pub running_count: u32,
    pub pending_count: u32,
}

impl NodeStatus {
    pub fn is_idle(&self) -> bool {
        self.running_count == 0 && self.pending_count == 0
    }
}

// ── Images and storage ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub image_id: ImageId,
    pub name: String,
    pub owner: String,
    /// RFC 3339 timestamp; lexicographic order is chronological.
    pub creation_date: String,
    #[serde(default)]
    pub snapshot_ids: Vec<String>,
}

impl Image {
    /// Sort images so the most recently created comes first.
    pub fn sort_newest_first(images: &mut [Image]) {
        images.sort_by(|a, b| b.creation_date.cmp(&a.creation_date));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub owner: String,
    /// RFC 3339 timestamp.
    pub start_time: String,
}

impl Snapshot {
    pub fn sort_newest_first(snapshots: &mut [Snapshot]) {
        snapshots.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: String,
    #[serde(default)]
    pub snapshot_id: Option<String>,
}

// ── Engine snapshot records ────────────────────────────────────────

/// A cluster node as seen at classification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub instance_id: InstanceId,
    /// Cluster registration handle.
    pub arn: String,
    pub image_id: ImageId,
    pub running_count: u32,
    pub pending_count: u32,
    pub availability_zone: String,
    pub group: String,
    pub cluster: String,
}

impl Node {
    pub fn is_idle(&self) -> bool {
        self.running_count == 0 && self.pending_count == 0
    }
}

/// The scaling group a run operates on.
///
/// `target_image` is resolved once per run and never changes afterwards;
/// `size` is refreshed on every classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingGroupRef {
    pub name: String,
    pub size: usize,
    pub target_image: ImageId,
}

impl ScalingGroupRef {
    pub fn new(name: impl Into<String>, target_image: impl Into<ImageId>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            target_image: target_image.into(),
        }
    }
}

/// Classified snapshot of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    /// Nodes carrying one workload unit on an obsolete image.
    pub in_place: Vec<Node>,
    /// Idle nodes on an obsolete image, by instance id.
    pub unused: Vec<InstanceId>,
    /// Idle nodes already on the target image.
    pub free: Vec<Node>,
    /// Group member count minus nodes known to be draining.
    pub size: usize,
    /// Group member count as the group reports it, draining nodes included.
    pub members: usize,
    pub group: ScalingGroupRef,
}
