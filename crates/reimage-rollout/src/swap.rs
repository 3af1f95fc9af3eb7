//! Instance swap sequencer.
//!
//! Rotates every in-place-replaceable node onto the target image inside a
//! single `start`/`finish` bracket of the deployment state machine. One
//! task per node runs on a [`JoinSet`]; the first failure is reported only
//! after every task has finished, and leaves the deployment `Running`.

use std::slice;

use anyhow::ensure;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use reimage_fleet::{Cluster, InstanceId, Node, RegistrationStatus};

use crate::classifier::node_statuses;
use crate::context::RunContext;
use crate::deploy::Deployment;
use crate::error::{ReplaceError, ReplaceResult};
use crate::stop::stop_unused;

/// Swap every outdated node of `cluster`; returns the ids that were rotated.
///
/// The batch is the in-place-replaceable nodes followed by the free ones.
/// Free nodes are idle and on target, so their tasks are no-ops; they
/// count toward the idle headroom the batch needs.
pub async fn swap_all(
    ctx: &RunContext,
    deploy: &mut Deployment,
    cluster: &Cluster,
) -> ReplaceResult<Vec<InstanceId>> {
    deploy.start()?;

    for node in &cluster.in_place {
        ctx.clients
            .groups
            .set_scale_in_protection(&node.group, &node.instance_id, false, ctx.dry_run)
            .await
            .map_err(ReplaceError::fleet(format!(
                "clear scale-in protection on {}",
                node.instance_id
            )))?;
    }

    let batch: Vec<Node> = cluster
        .in_place
        .iter()
        .chain(cluster.free.iter())
        .cloned()
        .collect();

    let idle = batch.iter().filter(|n| n.is_idle()).count();
    if idle == 0 {
        if !ctx.dry_run {
            return Err(ReplaceError::NoEmptyInstances(cluster.name.clone()));
        }
        // Headroom is never added in dry-run.
        warn!(cluster = %cluster.name, "no empty instances, continuing dry run");
    }

    info!(
        cluster = %cluster.name,
        candidates = cluster.in_place.len(),
        idle,
        image = %cluster.group.target_image,
        "swapping nodes"
    );

    let mut tasks = JoinSet::new();
    for node in batch {
        let ctx = ctx.clone();
        let target = cluster.group.target_image.clone();
        let expected_size = cluster.members;
        tasks.spawn(async move {
            let swapped = swap_node(&ctx, &node, &target, expected_size).await?;
            Ok::<_, ReplaceError>(swapped.then_some(node.instance_id))
        });
    }

    let mut swapped = Vec::new();
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.unwrap_or_else(|e| Err(ReplaceError::UnitAborted(e.to_string())));
        match outcome {
            Ok(Some(id)) => swapped.push(id),
            Ok(None) => {}
            Err(e) => {
                warn!(cluster = %cluster.name, error = %e, "swap task failed");
                first_error.get_or_insert(e);
            }
        }
    }
    if let Some(e) = first_error {
        return Err(e);
    }

    deploy.finish()?;
    swapped.sort();
    Ok(swapped)
}

/// Rotate one node. Returns `false` when the node needed nothing.
async fn swap_node(
    ctx: &RunContext,
    node: &Node,
    target_image: &str,
    expected_size: usize,
) -> ReplaceResult<bool> {
    if node.image_id == target_image {
        info!(node = %node.instance_id, image = %node.image_id, "already on target image");
        return Ok(false);
    }
    if node.is_idle() {
        debug!(node = %node.instance_id, "idle node kept as headroom");
        return Ok(false);
    }

    drain(ctx, node).await?;
    stop_unused(ctx, &node.group, slice::from_ref(&node.instance_id), expected_size).await?;

    if !ctx.dry_run {
        let cluster = node.cluster.as_str();
        ctx.profiles
            .short
            .retry("workload resettled", ctx.shutdown(), move || async move {
                let statuses = node_statuses(ctx, cluster).await?;
                ensure!(
                    statuses.iter().any(|s| s.running_count >= 1),
                    "no node in {cluster} is running work"
                );
                anyhow::Ok(())
            })
            .await?;
    }

    info!(node = %node.instance_id, from = %node.image_id, "node swapped");
    Ok(true)
}

/// Mark the node draining and wait (short profile) for its work to leave.
async fn drain(ctx: &RunContext, node: &Node) -> ReplaceResult<()> {
    ctx.clients
        .cluster
        .set_node_status(&node.cluster, &node.arn, RegistrationStatus::Draining, ctx.dry_run)
        .await
        .map_err(ReplaceError::fleet(format!("drain {}", node.instance_id)))?;
    debug!(node = %node.instance_id, dry_run = ctx.dry_run, "draining");

    if ctx.dry_run {
        return Ok(());
    }

    let what = format!("drain {}", node.instance_id);
    ctx.profiles
        .short
        .retry(&what, ctx.shutdown(), move || async move {
            let statuses = ctx
                .clients
                .cluster
                .describe_nodes(&node.cluster, slice::from_ref(&node.arn))
                .await?;
            let running = statuses.first().map_or(0, |s| s.running_count);
            ensure!(running == 0, "{} still runs {running} units", node.instance_id);
            anyhow::Ok(())
        })
        .await
}
