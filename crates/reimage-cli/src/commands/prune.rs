use anyhow::Context;

use reimage_fleet::Clients;
use reimage_prune::{ImagePruneRequest, format_report, remove_images, remove_snapshots};

use super::{Format, emit};

pub async fn images(clients: Clients, req: ImagePruneRequest, dry_run: bool, format: Format) -> anyhow::Result<()> {
    let report = remove_images(&clients, &req, dry_run)
        .await
        .with_context(|| format!("removing images matching {} (owner {})", req.image_filter, req.owner))?;
    emit(format, &report, format_report)
}

pub async fn snapshots(clients: Clients, owner: &str, dry_run: bool, format: Format) -> anyhow::Result<()> {
    let report = remove_snapshots(&clients, owner, dry_run)
        .await
        .with_context(|| format!("removing snapshots owned by {owner}"))?;
    emit(format, &report, format_report)
}
