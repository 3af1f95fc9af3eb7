//! Cluster state classifier.
//!
//! Builds a fresh [`Cluster`] snapshot from the scaling group and the
//! cluster's active registrations. Each active node lands in at most one
//! set:
//!
//! ```text
//! idle, image == target             → free
//! idle, image != target             → unused (id only)
//! one running unit, image != target → in_place
//! ```
//!
//! Resolving a node's image costs one launch-template lookup per node;
//! any lookup failure aborts classification rather than skipping the node.

use std::slice;

use tracing::debug;

use reimage_fleet::{Cluster, ImageId, Node, NodeStatus, RegistrationStatus, ScalingGroupRef};

use crate::context::RunContext;
use crate::error::{ReplaceError, ReplaceResult};

/// Classify `cluster_name` against the group's target image.
///
/// The returned snapshot carries `group` with a refreshed `size`; the
/// target image is copied through unchanged.
pub async fn classify(
    ctx: &RunContext,
    cluster_name: &str,
    group: &ScalingGroupRef,
) -> ReplaceResult<Cluster> {
    let desc = ctx
        .clients
        .groups
        .describe_group(&group.name)
        .await
        .map_err(ReplaceError::fleet(format!("describe scaling group {}", group.name)))?;
    if desc.members.is_empty() {
        return Err(ReplaceError::NotFound(format!(
            "scaling group {} has no instances",
            group.name
        )));
    }

    let statuses = node_statuses(ctx, cluster_name).await?;
    let draining = statuses
        .iter()
        .filter(|s| s.status == RegistrationStatus::Draining && desc.contains(&s.instance_id))
        .count();
    let size = desc.size().saturating_sub(draining);

    let mut in_place = Vec::new();
    let mut unused = Vec::new();
    let mut free = Vec::new();
    let mut active = 0usize;
    let mut outdated = 0usize;

    for status in &statuses {
        if status.status != RegistrationStatus::Active {
            continue;
        }
        if !desc.contains(&status.instance_id) {
            debug!(node = %status.instance_id, group = %group.name, "skipping node outside the group");
            continue;
        }
        active += 1;

        let image = node_image(ctx, &status.instance_id).await?;
        let current = image == group.target_image;
        if !current {
            outdated += 1;
        }

        if status.is_idle() {
            if current {
                free.push(node(ctx, status, image, cluster_name, &group.name).await?);
            } else {
                unused.push(status.instance_id.clone());
            }
        } else if status.running_count == 1 && !current {
            in_place.push(node(ctx, status, image, cluster_name, &group.name).await?);
        }
    }

    if active == 0 {
        return Err(ReplaceError::NotFound(format!(
            "cluster {cluster_name} has no active nodes from group {}",
            group.name
        )));
    }
    if outdated == 0 {
        return Err(ReplaceError::AlreadyConverged {
            cluster: cluster_name.to_string(),
            image: group.target_image.clone(),
        });
    }

    debug!(
        cluster = %cluster_name,
        size,
        in_place = in_place.len(),
        unused = unused.len(),
        free = free.len(),
        "classified cluster"
    );

    Ok(Cluster {
        name: cluster_name.to_string(),
        in_place,
        unused,
        free,
        size,
        members: desc.size(),
        group: ScalingGroupRef {
            name: group.name.clone(),
            size,
            target_image: group.target_image.clone(),
        },
    })
}

/// Registration status of every node in the cluster.
pub(crate) async fn node_statuses(ctx: &RunContext, cluster_name: &str) -> ReplaceResult<Vec<NodeStatus>> {
    let arns = ctx
        .clients
        .cluster
        .list_registered_nodes(cluster_name)
        .await
        .map_err(ReplaceError::fleet(format!("list nodes of cluster {cluster_name}")))?;
    if arns.is_empty() {
        return Ok(Vec::new());
    }
    ctx.clients
        .cluster
        .describe_nodes(cluster_name, &arns)
        .await
        .map_err(ReplaceError::fleet(format!("describe nodes of cluster {cluster_name}")))
}

/// Image an instance was launched with, via its launch template version.
async fn node_image(ctx: &RunContext, instance_id: &str) -> ReplaceResult<ImageId> {
    let template = ctx
        .clients
        .groups
        .describe_instance(instance_id)
        .await
        .map_err(ReplaceError::fleet(format!("describe launch template of {instance_id}")))?;
    ctx.clients
        .compute
        .describe_launch_template_version(&template.template_id, &template.version)
        .await
        .map_err(ReplaceError::fleet(format!(
            "describe launch template {} version {}",
            template.template_id, template.version
        )))
}

async fn node(
    ctx: &RunContext,
    status: &NodeStatus,
    image_id: ImageId,
    cluster_name: &str,
    group_name: &str,
) -> ReplaceResult<Node> {
    let described = ctx
        .clients
        .compute
        .describe_instances(slice::from_ref(&status.instance_id))
        .await
        .map_err(ReplaceError::fleet(format!("describe instance {}", status.instance_id)))?;
    let zone = described
        .into_iter()
        .next()
        .map(|d| d.availability_zone)
        .ok_or_else(|| ReplaceError::NotFound(format!("instance {}", status.instance_id)))?;

    Ok(Node {
        instance_id: status.instance_id.clone(),
        arn: status.arn.clone(),
        image_id,
        running_count: status.running_count,
        pending_count: status.pending_count,
        availability_zone: zone,
        group: group_name.to_string(),
        cluster: cluster_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use reimage_fleet::Operation;
    use std::collections::HashSet;

    #[tokio::test]
    async fn partitions_nodes_into_disjoint_sets() {
        let fleet = fleet(&[
            old("i-busy", 1),
            old("i-idle", 0),
            new("i-free", 0),
            new("i-done", 1),
            old("i-heavy", 3),
        ]);
        let ctx = context(&fleet);

        let cluster = classify(&ctx, CLUSTER, &group_ref()).await.unwrap();

        let in_place: Vec<_> = cluster.in_place.iter().map(|n| n.instance_id.as_str()).collect();
        let free: Vec<_> = cluster.free.iter().map(|n| n.instance_id.as_str()).collect();
        assert_eq!(in_place, vec!["i-busy"]);
        assert_eq!(cluster.unused, vec!["i-idle".to_string()]);
        assert_eq!(free, vec!["i-free"]);
        assert_eq!(cluster.size, 5);
        assert_eq!(cluster.group.target_image, NEW);

        let mut seen = HashSet::new();
        for id in in_place.iter().copied().chain(free.iter().copied()).chain(cluster.unused.iter().map(String::as_str)) {
            assert!(seen.insert(id), "{id} classified twice");
        }
    }

    #[tokio::test]
    async fn in_place_nodes_carry_zone_and_image() {
        let fleet = fleet(&[old("i-busy", 1), new("i-free", 0)]);
        let ctx = context(&fleet);

        let cluster = classify(&ctx, CLUSTER, &group_ref()).await.unwrap();
        let node = &cluster.in_place[0];
        assert_eq!(node.image_id, OLD);
        assert_eq!(node.availability_zone, "sim-1a");
        assert_eq!(node.group, GROUP);
        assert_eq!(node.cluster, CLUSTER);
    }

    #[tokio::test]
    async fn converged_cluster_is_reported_not_empty() {
        let fleet = fleet(&[new("i-a", 1), new("i-b", 0)]);
        let ctx = context(&fleet);

        let err = classify(&ctx, CLUSTER, &group_ref()).await.unwrap_err();
        assert!(matches!(err, ReplaceError::AlreadyConverged { .. }));
    }

    #[tokio::test]
    async fn empty_group_is_not_found() {
        let fleet = fleet(&[]);
        let ctx = context(&fleet);

        let err = classify(&ctx, CLUSTER, &group_ref()).await.unwrap_err();
        assert!(matches!(err, ReplaceError::NotFound(_)));
    }

    #[tokio::test]
    async fn draining_nodes_are_excluded_and_shrink_size() {
        let mut draining = old("i-drain", 1);
        draining.status = RegistrationStatus::Draining;
        let fleet = fleet(&[draining, old("i-busy", 1), new("i-free", 0)]);
        fleet.pin("i-drain");
        let ctx = context(&fleet);

        let cluster = classify(&ctx, CLUSTER, &group_ref()).await.unwrap();
        assert_eq!(cluster.size, 2);
        assert_eq!(cluster.members, 3);
        assert!(cluster.in_place.iter().all(|n| n.instance_id != "i-drain"));
    }

    #[tokio::test]
    async fn node_with_pending_work_is_not_stoppable() {
        let mut queued = old("i-queued", 0);
        queued.pending = 1;
        let fleet = fleet(&[queued, old("i-busy", 1), new("i-free", 0)]);
        let ctx = context(&fleet);

        let cluster = classify(&ctx, CLUSTER, &group_ref()).await.unwrap();
        assert!(cluster.unused.is_empty());
        assert!(cluster.in_place.iter().all(|n| n.instance_id != "i-queued"));
        assert!(cluster.free.iter().all(|n| n.instance_id != "i-queued"));
    }

    #[tokio::test]
    async fn image_lookup_failure_aborts() {
        let fleet = fleet(&[old("i-busy", 1), new("i-free", 0)]);
        fleet.fail(Operation::DescribeLaunchTemplate);
        let ctx = context(&fleet);

        let err = classify(&ctx, CLUSTER, &group_ref()).await.unwrap_err();
        assert!(matches!(err, ReplaceError::Fleet { .. }));
    }
}
