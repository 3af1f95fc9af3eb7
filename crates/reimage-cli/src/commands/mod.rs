pub mod prune;
pub mod replace;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::ValueEnum;
use serde::Serialize;
use tracing::info;

use reimage_fleet::{Clients, FleetSpec, MemoryFleet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// Collaborators for this invocation.
///
/// Only the simulated fleet is wired in; a run without a fleet
/// description has nothing to talk to.
pub fn connect(fleet: Option<&Path>, region: &str) -> anyhow::Result<Clients> {
    let Some(path) = fleet else {
        bail!("no provider configured for region {region}: pass --fleet <path> or set `fleet` in the config file");
    };
    let spec = FleetSpec::from_file(path)
        .with_context(|| format!("failed to load fleet description {}", path.display()))?;
    let fleet = MemoryFleet::from_spec(spec)
        .with_context(|| format!("invalid fleet description {}", path.display()))?;
    info!(fleet = %path.display(), %region, "using simulated fleet");
    Ok(Clients::from_provider(Arc::new(fleet)))
}

/// Print `value` as JSON or through its text formatter.
pub fn emit<T: Serialize>(format: Format, value: &T, text: impl FnOnce(&T) -> String) -> anyhow::Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
        Format::Text => println!("{}", text(value)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn demo_fleet() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/fleet.toml")
    }

    #[tokio::test]
    async fn demo_fleet_loads() {
        let clients = connect(Some(&demo_fleet()), "ap-northeast-1").unwrap();
        let group = clients.groups.describe_group("web").await.unwrap();
        assert_eq!(group.size(), 3);
    }

    #[test]
    fn missing_fleet_is_an_error() {
        let err = connect(None, "ap-northeast-1").unwrap_err();
        assert!(err.to_string().contains("--fleet"));
    }
}
