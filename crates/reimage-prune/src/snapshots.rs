//! Orphaned snapshot cleanup (`rms`).

use tracing::{debug, info};

use reimage_fleet::{Clients, Snapshot};

use crate::error::{PruneError, PruneResult};
use crate::report::PruneReport;

/// Delete every snapshot owned by `owner` that no image references and
/// no volume was created from.
pub async fn remove_snapshots(clients: &Clients, owner: &str, dry_run: bool) -> PruneResult<PruneReport> {
    let mut snapshots = clients
        .images
        .describe_snapshots(owner)
        .await
        .map_err(PruneError::fleet(format!("describe snapshots owned by {owner}")))?;
    Snapshot::sort_newest_first(&mut snapshots);

    let mut report = PruneReport {
        dry_run,
        ..PruneReport::default()
    };
    for snapshot in snapshots {
        let id = snapshot.snapshot_id;
        let images = clients
            .images
            .images_using_snapshot(&id)
            .await
            .map_err(PruneError::fleet(format!("describe images using {id}")))?;
        let volumes = clients
            .images
            .volumes_from_snapshot(&id)
            .await
            .map_err(PruneError::fleet(format!("describe volumes from {id}")))?;

        if !images.is_empty() || !volumes.is_empty() {
            debug!(snapshot = %id, images = images.len(), volumes = volumes.len(), "snapshot in use");
            report.kept_snapshots.push(id);
            continue;
        }

        info!(snapshot = %id, started = %snapshot.start_time, dry_run, "deleting orphaned snapshot");
        clients
            .images
            .delete_snapshot(&id, dry_run)
            .await
            .map_err(PruneError::fleet(format!("delete snapshot {id}")))?;
        report.deleted_snapshots.push(id);
    }
    Ok(report)
}
