//! Cleanup summary.

use serde::Serialize;

use reimage_fleet::ImageId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Image the group launches from; only set by image cleanup.
    pub in_use_image: Option<ImageId>,
    pub deregistered_images: Vec<ImageId>,
    pub deleted_snapshots: Vec<String>,
    /// Snapshots still referenced by an image or a volume.
    pub kept_snapshots: Vec<String>,
    pub dry_run: bool,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.deregistered_images.is_empty() && self.deleted_snapshots.is_empty()
    }
}

pub fn format_report(report: &PruneReport) -> String {
    let mut out = String::new();
    let mode = if report.dry_run { " [dry run]" } else { "" };

    if let Some(image) = &report.in_use_image {
        out.push_str(&format!("In use: {image}\n"));
    }
    if report.is_empty() {
        out.push_str("✅ nothing to clean up\n");
    }
    if !report.deregistered_images.is_empty() {
        out.push_str(&format!("Images deregistered{mode} ({}):\n", report.deregistered_images.len()));
        for id in &report.deregistered_images {
            out.push_str(&format!("  • {id}\n"));
        }
    }
    if !report.deleted_snapshots.is_empty() {
        out.push_str(&format!("Snapshots deleted{mode} ({}):\n", report.deleted_snapshots.len()));
        for id in &report.deleted_snapshots {
            out.push_str(&format!("  • {id}\n"));
        }
    }
    if !report.kept_snapshots.is_empty() {
        out.push_str(&format!("Snapshots kept ({}), still referenced\n", report.kept_snapshots.len()));
    }
    out
}
