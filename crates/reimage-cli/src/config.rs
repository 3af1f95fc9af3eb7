//! reimage.toml configuration.
//!
//! ```toml
//! region = "ap-northeast-1"
//! fleet = "demos/fleet.toml"
//!
//! [backoff.long]
//! initial_secs = 10
//! max_elapsed_secs = 600
//!
//! [backoff.short]
//! max_attempts = 50
//! ```
//!
//! Every key is optional. Command-line flags win over the file.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, bail, ensure};
use regex::Regex;
use serde::{Deserialize, Serialize};

use reimage_rollout::{Backoff, BackoffProfiles};

pub const DEFAULT_REGION: &str = "ap-northeast-1";

static REGION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(us|eu|ap|sa|ca)-\w+-\d+$").expect("region pattern is valid"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReimageConfig {
    pub region: Option<String>,
    /// Simulated fleet description used when `--fleet` is not given.
    pub fleet: Option<PathBuf>,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    pub long: Option<BackoffOverride>,
    pub short: Option<BackoffOverride>,
}

/// Partial override of one polling profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffOverride {
    pub initial_secs: Option<u64>,
    pub max_interval_secs: Option<u64>,
    pub max_elapsed_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub multiplier: Option<f64>,
}

impl BackoffOverride {
    fn apply(&self, mut base: Backoff) -> anyhow::Result<Backoff> {
        if let Some(secs) = self.initial_secs {
            base.initial_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.max_interval_secs {
            base.max_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.max_elapsed_secs {
            base.max_elapsed = Duration::from_secs(secs);
        }
        if let Some(attempts) = self.max_attempts {
            base.max_attempts = attempts;
        }
        if let Some(multiplier) = self.multiplier {
            ensure!(
                multiplier.is_finite() && multiplier >= 1.0,
                "backoff multiplier must be at least 1.0, got {multiplier}"
            );
            base.multiplier = multiplier;
        }
        ensure!(base.max_attempts > 0, "backoff max_attempts must be at least 1");
        ensure!(
            base.initial_interval <= base.max_interval,
            "backoff initial interval exceeds its cap"
        );
        Ok(base)
    }
}

impl ReimageConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: ReimageConfig =
            toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn profiles(&self) -> anyhow::Result<BackoffProfiles> {
        let mut profiles = BackoffProfiles::default();
        if let Some(long) = &self.backoff.long {
            profiles.long = long.apply(profiles.long).context("[backoff.long]")?;
        }
        if let Some(short) = &self.backoff.short {
            profiles.short = short.apply(profiles.short).context("[backoff.short]")?;
        }
        Ok(profiles)
    }

    /// Region from the flag, then the file, then the default; validated.
    pub fn region(&self, flag: Option<&str>) -> anyhow::Result<String> {
        let region = flag
            .or(self.region.as_deref())
            .unwrap_or(DEFAULT_REGION);
        validate_region(region)?;
        Ok(region.to_string())
    }
}

pub fn validate_region(region: &str) -> anyhow::Result<()> {
    if !REGION.is_match(region) {
        bail!("not a valid region: {region}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn accepts_known_region_shapes() {
        for region in ["ap-northeast-1", "us-east-2", "eu-west-1", "sa-east-1", "ca-central-1"] {
            assert!(validate_region(region).is_ok(), "{region}");
        }
        for region in ["", "mars-north-1", "us-east", "US-EAST-1", "us-east-1a"] {
            assert!(validate_region(region).is_err(), "{region}");
        }
    }

    #[test]
    fn flag_beats_file_beats_default() {
        let config = ReimageConfig {
            region: Some("eu-west-1".into()),
            ..ReimageConfig::default()
        };
        assert_eq!(config.region(Some("us-east-1")).unwrap(), "us-east-1");
        assert_eq!(config.region(None).unwrap(), "eu-west-1");
        assert_eq!(ReimageConfig::default().region(None).unwrap(), DEFAULT_REGION);
    }

    #[test]
    fn parses_file_with_partial_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
region = "us-west-2"
fleet = "fleet.toml"

[backoff.long]
initial_secs = 2
max_attempts = 5

[backoff.short]
multiplier = 2.0
"#
        )
        .unwrap();

        let config = ReimageConfig::from_file(file.path()).unwrap();
        assert_eq!(config.region.as_deref(), Some("us-west-2"));
        assert_eq!(config.fleet, Some(PathBuf::from("fleet.toml")));

        let profiles = config.profiles().unwrap();
        assert_eq!(profiles.long.initial_interval, Duration::from_secs(2));
        assert_eq!(profiles.long.max_attempts, 5);
        assert_eq!(profiles.long.max_interval, Backoff::long().max_interval);
        assert_eq!(profiles.short.multiplier, 2.0);
        assert_eq!(profiles.short.max_attempts, Backoff::short().max_attempts);
    }

    #[test]
    fn rejects_shrinking_multiplier() {
        let config: ReimageConfig = toml::from_str("[backoff.short]\nmultiplier = 0.5\n").unwrap();
        let err = config.profiles().unwrap_err();
        assert!(format!("{err:#}").contains("multiplier"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<ReimageConfig>("regoin = \"us-east-1\"\n").is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = ReimageConfig::load(Some(Path::new("/nonexistent/reimage.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/reimage.toml"));
    }
}
