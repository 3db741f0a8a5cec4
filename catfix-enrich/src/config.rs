//! Run configuration resolution for catfix-enrich
//!
//! Layers command-line overrides on top of [`AppConfig::load`], giving the
//! full priority order CLI → ENV → TOML → compiled defaults. The merged
//! configuration is validated again after the CLI tier is applied.

use catfix_common::{AppConfig, Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Settings given on the command line (highest priority tier)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOverrides {
    pub output_dir: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub use_mocks: Option<bool>,
    pub mock_profile: Option<String>,
    pub confidence_threshold: Option<f64>,
}

impl RunOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply every present override and re-validate
    pub fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(use_mocks) = self.use_mocks {
            config.use_mocks = use_mocks;
        }
        if let Some(profile) = &self.mock_profile {
            config.mock_profile = profile.trim().to_lowercase();
        }
        if let Some(threshold) = self.confidence_threshold {
            config.confidence_threshold = threshold;
        }

        if !self.is_empty() {
            debug!(overrides = ?self, "Applied command-line overrides");
        }
        config.validate()
    }
}

/// Load the configuration for one run
///
/// # Errors
/// `Config` when an explicit config file is missing or unreadable, an ENV
/// value does not parse, or the merged result fails validation
pub fn resolve_run_config(
    config_path: Option<&Path>,
    overrides: &RunOverrides,
) -> Result<AppConfig> {
    let mut config = AppConfig::load(config_path)?;
    overrides.apply(&mut config)?;

    info!(
        mode = if config.use_mocks { "mock" } else { "live" },
        concurrency = config.concurrency,
        confidence_threshold = config.confidence_threshold,
        output_dir = %config.output_dir.display(),
        "Run configuration resolved"
    );
    Ok(config)
}

/// Reject a non-positive `--timeout-secs`
pub fn validate_timeout(timeout_secs: Option<f64>) -> Result<Option<std::time::Duration>> {
    match timeout_secs {
        None => Ok(None),
        Some(secs) if secs > 0.0 => std::time::Duration::try_from_secs_f64(secs)
            .map(Some)
            .map_err(|e| Error::Config(format!("timeout {} is not representable: {}", secs, e))),
        Some(secs) => Err(Error::Config(format!("timeout must be > 0 seconds, got {}", secs))),
    }
}
