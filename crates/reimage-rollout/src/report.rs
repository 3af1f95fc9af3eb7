//! Run summary.

use serde::Serialize;

use reimage_fleet::{ImageId, InstanceId};

/// What one replacement run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub cluster: String,
    pub group: String,
    pub target_image: ImageId,
    /// Group size observed before any change; restored at the end.
    pub default_size: usize,
    /// Idle outdated nodes stopped before swapping.
    pub stopped: Vec<InstanceId>,
    pub headroom_added: bool,
    pub swapped: Vec<InstanceId>,
    pub final_size: usize,
    /// The cluster already ran the target image everywhere.
    pub converged: bool,
    pub dry_run: bool,
}

pub fn format_report(report: &RunReport) -> String {
    let mut out = String::new();

    let mode = if report.dry_run { "dry run" } else { "applied" };
    out.push_str("\n╔══════════════════════════════════════════╗\n");
    out.push_str("║  Reimage Replacement Run                 ║\n");
    out.push_str("╠══════════════════════════════════════════╣\n");
    out.push_str(&format!("║  Cluster: {:<30}║\n", report.cluster));
    out.push_str(&format!("║  Group:   {:<30}║\n", report.group));
    out.push_str(&format!("║  Image:   {:<30}║\n", report.target_image));
    out.push_str(&format!("║  Mode:    {:<30}║\n", mode));
    out.push_str("╚══════════════════════════════════════════╝\n\n");

    if report.converged && report.stopped.is_empty() && report.swapped.is_empty() {
        out.push_str("✅ already converged, nothing to replace\n");
        return out;
    }

    out.push_str(&format!(
        "Size: {} → {}{}\n",
        report.default_size,
        report.final_size,
        if report.headroom_added { " (temporary +1 headroom)" } else { "" }
    ));

    if !report.stopped.is_empty() {
        out.push_str(&format!("\nStopped unused ({}):\n", report.stopped.len()));
        for id in &report.stopped {
            out.push_str(&format!("  • {id}\n"));
        }
    }

    if !report.swapped.is_empty() {
        out.push_str(&format!("\nSwapped ({}):\n", report.swapped.len()));
        for id in &report.swapped {
            out.push_str(&format!("  • {id}\n"));
        }
    }

    out
}
