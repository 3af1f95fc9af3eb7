//! Collaborator interfaces.
//!
//! The engine never talks to a provider SDK directly. Each concern is a
//! narrow async trait; a concrete provider implements all four and is
//! handed to the engine as a [`Clients`] bundle. Every mutating call
//! carries `dry_run` so the provider can validate without applying.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FleetResult;
use crate::types::*;

/// Scaling-group API.
#[async_trait]
pub trait ScalingGroupClient: Send + Sync {
    async fn describe_group(&self, name: &str) -> FleetResult<GroupDescription>;

    /// Launch template version a group member was launched from.
    async fn describe_instance(&self, instance_id: &str) -> FleetResult<LaunchTemplateRef>;

    async fn update_group(&self, name: &str, update: &GroupUpdate, dry_run: bool)
        -> FleetResult<()>;

    async fn set_scale_in_protection(
        &self,
        group: &str,
        instance_id: &str,
        protect: bool,
        dry_run: bool,
    ) -> FleetResult<()>;
}

/// Compute API.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn describe_instances(&self, ids: &[InstanceId]) -> FleetResult<Vec<InstanceDescription>>;

    /// Stop (not terminate) the given instances.
    async fn stop_instances(&self, ids: &[InstanceId], dry_run: bool) -> FleetResult<()>;

    async fn describe_launch_template_version(
        &self,
        template_id: &str,
        version: &str,
    ) -> FleetResult<ImageId>;
}

/// Container-cluster API.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_registered_nodes(&self, cluster: &str) -> FleetResult<Vec<String>>;

    async fn describe_nodes(&self, cluster: &str, arns: &[String]) -> FleetResult<Vec<NodeStatus>>;

    async fn set_node_status(
        &self,
        cluster: &str,
        arn: &str,
        status: RegistrationStatus,
        dry_run: bool,
    ) -> FleetResult<()>;
}

/// Image and snapshot API used by the cleanup workflows.
#[async_trait]
pub trait ImageClient: Send + Sync {
    /// Images owned by `owner` whose name matches `name_filter` (`*` wildcard).
    async fn describe_images(&self, owner: &str, name_filter: &str) -> FleetResult<Vec<Image>>;

    async fn deregister_image(&self, image_id: &str, dry_run: bool) -> FleetResult<()>;

    async fn describe_snapshots(&self, owner: &str) -> FleetResult<Vec<Snapshot>>;

    /// Images with a block device mapping backed by the snapshot.
    async fn images_using_snapshot(&self, snapshot_id: &str) -> FleetResult<Vec<Image>>;

    async fn volumes_from_snapshot(&self, snapshot_id: &str) -> FleetResult<Vec<Volume>>;

    async fn delete_snapshot(&self, snapshot_id: &str, dry_run: bool) -> FleetResult<()>;
}

/// Shared handles to every collaborator. Cheap to clone.
#[derive(Clone)]
pub struct Clients {
    pub groups: Arc<dyn ScalingGroupClient>,
    pub compute: Arc<dyn ComputeClient>,
    pub cluster: Arc<dyn ClusterClient>,
    pub images: Arc<dyn ImageClient>,
}

impl Clients {
    /// Build a bundle from one provider that implements every interface.
    pub fn from_provider<P>(provider: Arc<P>) -> Self
    where
        P: ScalingGroupClient + ComputeClient + ClusterClient + ImageClient + 'static,
    {
        Self {
            groups: provider.clone(),
            compute: provider.clone(),
            cluster: provider.clone(),
            images: provider,
        }
    }
}

impl std::fmt::Debug for Clients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clients").finish_non_exhaustive()
    }
}
