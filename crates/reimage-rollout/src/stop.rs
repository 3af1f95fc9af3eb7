//! Stop-unused operation.

use anyhow::ensure;
use tracing::info;

use reimage_fleet::InstanceId;

use crate::context::RunContext;
use crate::error::{ReplaceError, ReplaceResult};

/// Stop `ids`, wait until each is halted, then wait until the group has
/// healed back to `expected_size` members.
///
/// Both waits use the long profile and either timing out fails the call.
/// In dry-run the stop request is still issued and both waits are skipped.
pub async fn stop_unused(
    ctx: &RunContext,
    group: &str,
    ids: &[InstanceId],
    expected_size: usize,
) -> ReplaceResult<()> {
    if ids.is_empty() {
        return Ok(());
    }

    ctx.clients
        .compute
        .stop_instances(ids, ctx.dry_run)
        .await
        .map_err(ReplaceError::fleet(format!("stop instances {}", ids.join(","))))?;
    info!(%group, instances = %ids.join(","), dry_run = ctx.dry_run, "stop requested");

    if ctx.dry_run {
        return Ok(());
    }

    let halted = format!("instances {} halted", ids.join(","));
    ctx.profiles
        .long
        .retry(&halted, ctx.shutdown(), move || async move {
            let described = ctx.clients.compute.describe_instances(ids).await?;
            for id in ids {
                let state = described
                    .iter()
                    .find(|d| &d.instance_id == id)
                    .map(|d| d.state);
                ensure!(
                    state.is_some_and(|s| s.is_halted()),
                    "{id} is {}",
                    state.map_or_else(|| "missing".to_string(), |s| s.to_string())
                );
            }
            anyhow::Ok(())
        })
        .await?;

    let healed = format!("group {group} back to {expected_size}");
    ctx.profiles
        .long
        .retry(&healed, ctx.shutdown(), move || async move {
            let desc = ctx.clients.groups.describe_group(group).await?;
            ensure!(
                desc.size() == expected_size,
                "group has {} members",
                desc.size()
            );
            anyhow::Ok(())
        })
        .await?;

    info!(%group, stopped = ids.len(), size = expected_size, "stopped instances replaced");
    Ok(())
}
