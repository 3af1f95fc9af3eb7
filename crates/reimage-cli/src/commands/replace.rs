use anyhow::Context;
use tokio::sync::watch;

use reimage_fleet::Clients;
use reimage_rollout::{BackoffProfiles, ReplaceRequest, Replacer, RunContext, format_report};

use super::{Format, emit};

pub async fn replace(
    clients: Clients,
    profiles: BackoffProfiles,
    shutdown: watch::Receiver<bool>,
    req: ReplaceRequest,
    dry_run: bool,
    format: Format,
) -> anyhow::Result<()> {
    let ctx = RunContext::new(clients)
        .with_profiles(profiles)
        .with_dry_run(dry_run)
        .with_shutdown(shutdown);

    let report = Replacer::new(ctx)
        .run(&req)
        .await
        .with_context(|| format!("replacing nodes of cluster {} (group {})", req.cluster, req.group))?;

    emit(format, &report, format_report)
}
