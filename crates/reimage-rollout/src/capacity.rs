//! Capacity adjuster.
//!
//! Resizes the scaling group and waits for the group and the cluster to
//! agree on the new size.

use anyhow::ensure;
use tracing::info;

use reimage_fleet::{GroupUpdate, RegistrationStatus};

use crate::classifier::node_statuses;
use crate::context::RunContext;
use crate::error::{ReplaceError, ReplaceResult};

/// Set the group's desired size to `target`, then wait for convergence.
///
/// Only `desired` changes; min and max are passed back as the group
/// reports them, and a target outside them is `CapacityCeiling`. New
/// instances are launched without scale-in protection.
pub async fn set_size(ctx: &RunContext, group: &str, cluster: &str, target: usize) -> ReplaceResult<()> {
    let desc = ctx
        .clients
        .groups
        .describe_group(group)
        .await
        .map_err(ReplaceError::fleet(format!("describe scaling group {group}")))?;

    let in_bounds = u32::try_from(target)
        .is_ok_and(|t| (desc.min_size..=desc.max_size).contains(&t));
    if !in_bounds {
        return Err(ReplaceError::CapacityCeiling {
            group: group.to_string(),
            target,
            min: desc.min_size,
            max: desc.max_size,
        });
    }

    let update = GroupUpdate {
        desired: target as u32,
        min_size: desc.min_size,
        max_size: desc.max_size,
        protect_new: false,
    };
    ctx.clients
        .groups
        .update_group(group, &update, ctx.dry_run)
        .await
        .map_err(ReplaceError::fleet(format!("update scaling group {group} to {target}")))?;
    info!(%group, from = desc.desired, to = target, dry_run = ctx.dry_run, "scaling group resized");

    if ctx.dry_run {
        return Ok(());
    }
    wait_for_size(ctx, group, cluster, target).await
}

/// Poll (long profile) until the group has exactly `target` members and
/// every one of them is registered in the cluster, either active or
/// still draining.
pub async fn wait_for_size(ctx: &RunContext, group: &str, cluster: &str, target: usize) -> ReplaceResult<()> {
    let what = format!("group {group} at size {target}");
    ctx.profiles
        .long
        .retry(&what, ctx.shutdown(), move || async move {
            let desc = ctx.clients.groups.describe_group(group).await?;
            ensure!(
                desc.size() == target,
                "group has {} members, want {target}",
                desc.size()
            );

            let statuses = node_statuses(ctx, cluster).await?;
            let members: Vec<_> = statuses.iter().filter(|s| desc.contains(&s.instance_id)).collect();
            let draining = members
                .iter()
                .filter(|s| s.status == RegistrationStatus::Draining)
                .count();
            let active = members
                .iter()
                .filter(|s| s.status == RegistrationStatus::Active)
                .count();
            ensure!(
                active + draining == target,
                "cluster has {active} active and {draining} draining group nodes, want {target}"
            );
            anyhow::Ok(())
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use reimage_fleet::Call;

    #[tokio::test(start_paused = true)]
    async fn grows_and_waits_for_new_node() {
        let fleet = fleet(&[old("i-busy", 1)]);
        let ctx = context(&fleet);

        set_size(&ctx, GROUP, CLUSTER, 2).await.unwrap();

        assert_eq!(fleet.desired(GROUP), Some(2));
        assert_eq!(fleet.group_size(GROUP), Some(2));
        let launched = fleet.members(GROUP).into_iter().find(|id| id != "i-busy").unwrap();
        assert_eq!(fleet.is_protected(&launched), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_removes_idle_unprotected_node() {
        let fleet = fleet(&[old("i-busy", 1), new("i-spare", 0)]);
        let ctx = context(&fleet);

        set_size(&ctx, GROUP, CLUSTER, 1).await.unwrap();
        assert_eq!(fleet.members(GROUP), vec!["i-busy".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn target_above_max_is_rejected_without_update() {
        let fleet = fleet(&[old("i-busy", 1)]);
        let ctx = context(&fleet);

        let err = set_size(&ctx, GROUP, CLUSTER, 9).await.unwrap_err();
        assert!(matches!(err, ReplaceError::CapacityCeiling { target: 9, max: 8, .. }));
        assert!(fleet.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_issues_update_but_does_not_wait() {
        let fleet = fleet(&[old("i-busy", 1)]);
        let ctx = context(&fleet).with_dry_run(true);

        set_size(&ctx, GROUP, CLUSTER, 2).await.unwrap();

        assert_eq!(
            fleet.calls(),
            vec![Call::UpdateGroup {
                group: GROUP.to_string(),
                desired: 2,
                dry_run: true
            }]
        );
        assert_eq!(fleet.desired(GROUP), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn draining_member_counts_toward_size() {
        let mut draining = old("i-drain", 1);
        draining.status = RegistrationStatus::Draining;
        let fleet = fleet(&[draining, new("i-busy", 1)]);
        fleet.pin("i-drain");
        let ctx = context(&fleet);

        set_size(&ctx, GROUP, CLUSTER, 3).await.unwrap();

        assert_eq!(fleet.group_size(GROUP), Some(3));
        assert!(fleet.members(GROUP).contains(&"i-drain".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_size_times_out() {
        let fleet = fleet(&[old("i-busy", 1)]);
        let ctx = context(&fleet);

        let err = wait_for_size(&ctx, GROUP, CLUSTER, 3).await.unwrap_err();
        assert!(matches!(err, ReplaceError::TimedOut { .. }));
    }
}
