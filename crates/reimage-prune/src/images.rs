//! Image generation cleanup (`rmi`).

use tracing::{debug, info};

use reimage_fleet::{Clients, Image, ImageId};

use crate::error::{PruneError, PruneResult};
use crate::report::PruneReport;

/// Which images to consider and how many generations to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePruneRequest {
    /// Group whose first member's image is never deregistered.
    pub group: String,
    pub owner: String,
    pub image_filter: String,
    pub generations: usize,
    /// Also delete the snapshots backing each deregistered image.
    pub delete_snapshots: bool,
}

/// Deregister every matching image older than the newest `generations`.
///
/// The image the group currently launches from is kept regardless of
/// age. Finding nothing to deregister is an empty report.
pub async fn remove_images(
    clients: &Clients,
    req: &ImagePruneRequest,
    dry_run: bool,
) -> PruneResult<PruneReport> {
    if req.generations == 0 {
        return Err(PruneError::NoGenerations);
    }

    let in_use = image_in_use(clients, &req.group).await?;
    let mut images = clients
        .images
        .describe_images(&req.owner, &req.image_filter)
        .await
        .map_err(PruneError::fleet("describe images"))?;
    Image::sort_newest_first(&mut images);

    let outdated: Vec<Image> = images
        .into_iter()
        .skip(req.generations)
        .filter(|i| i.image_id != in_use)
        .collect();

    let mut report = PruneReport {
        in_use_image: Some(in_use),
        dry_run,
        ..PruneReport::default()
    };
    if outdated.is_empty() {
        info!(filter = %req.image_filter, keep = req.generations, "no outdated images");
        return Ok(report);
    }

    for image in outdated {
        info!(image = %image.image_id, name = %image.name, created = %image.creation_date, dry_run, "deregistering image");
        clients
            .images
            .deregister_image(&image.image_id, dry_run)
            .await
            .map_err(PruneError::fleet(format!("deregister image {}", image.image_id)))?;
        report.deregistered_images.push(image.image_id.clone());

        if !req.delete_snapshots {
            continue;
        }
        for snapshot_id in &image.snapshot_ids {
            debug!(image = %image.image_id, snapshot = %snapshot_id, dry_run, "deleting backing snapshot");
            clients
                .images
                .delete_snapshot(snapshot_id, dry_run)
                .await
                .map_err(PruneError::fleet(format!("delete snapshot {snapshot_id}")))?;
            report.deleted_snapshots.push(snapshot_id.clone());
        }
    }
    Ok(report)
}

/// Image the group's first member was launched from.
async fn image_in_use(clients: &Clients, group: &str) -> PruneResult<ImageId> {
    let desc = clients
        .groups
        .describe_group(group)
        .await
        .map_err(PruneError::fleet(format!("describe scaling group {group}")))?;
    let first = desc
        .members
        .first()
        .ok_or_else(|| PruneError::NotFound(format!("scaling group {group} has no instances")))?;

    let template = clients
        .groups
        .describe_instance(&first.instance_id)
        .await
        .map_err(PruneError::fleet(format!("describe launch template of {}", first.instance_id)))?;
    clients
        .compute
        .describe_launch_template_version(&template.template_id, &template.version)
        .await
        .map_err(PruneError::fleet(format!(
            "describe launch template {} version {}",
            template.template_id, template.version
        )))
}
