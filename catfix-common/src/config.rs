//! Configuration loading and resolution
//!
//! Bootstrap configuration is resolved in priority order:
//! 1. Command-line arguments (applied by the binary after loading)
//! 2. Environment variables (`CATFIX_*`)
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! Config file location follows the same idea: `--config` argument, then the
//! `CATFIX_CONFIG` environment variable, then `~/.config/catfix/catfix.toml`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CATFIX_CONFIG";

/// Mock profiles understood by the deterministic mock services
pub const VALID_MOCK_PROFILES: &[&str] =
    &["happy", "conflict", "missing", "errorrate10", "timeout"];

/// Upper bound on a per-request service timeout
pub const MAX_TIMEOUT_SECONDS: f64 = 3600.0;

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Complete bootstrap configuration for an import run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Minimum classification confidence required to create a catalog item (0.0-1.0)
    pub confidence_threshold: f64,
    /// Maximum number of records in flight against external services
    pub concurrency: usize,
    /// Directory receiving CSV reports
    pub output_dir: PathBuf,
    /// Wire deterministic mock services instead of HTTP clients
    pub use_mocks: bool,
    /// Mock behaviour profile (see [`VALID_MOCK_PROFILES`])
    pub mock_profile: String,
    /// Seed for mock services
    pub seed: u64,
    /// Group ("gn") candidates offered to the classifier
    pub group_candidates: Vec<String>,
    /// Subgroup ("vn") candidates offered to the classifier
    pub subgroup_candidates: Vec<String>,
    pub logging: LoggingConfig,
    pub catalog: ServiceConfig,
    pub secondary: ServiceConfig,
    pub classification: ServiceConfig,
    pub cache: CacheConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            concurrency: 4,
            output_dir: PathBuf::from("reports"),
            use_mocks: true,
            mock_profile: "happy".to_string(),
            seed: 42,
            group_candidates: vec!["GN1".into(), "GN2".into(), "GN3".into()],
            subgroup_candidates: vec!["VN1".into(), "VN2".into(), "VN3".into()],
            logging: LoggingConfig::default(),
            catalog: ServiceConfig::default(),
            secondary: ServiceConfig::default(),
            classification: ServiceConfig {
                timeout_seconds: 15.0,
                ..ServiceConfig::default()
            },
            cache: CacheConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Connection and retry settings for one external service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_seconds: f64,
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter_ms: u64,
    /// Optional client-side request ceiling
    pub rate_limit_per_second: Option<u32>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_seconds: 10.0,
            retry_attempts: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 2000,
            backoff_jitter_ms: 100,
            rate_limit_per_second: None,
        }
    }
}

impl ServiceConfig {
    /// Retry settings for this service
    pub fn retry(&self) -> RetrySettings {
        RetrySettings {
            attempts: self.retry_attempts,
            base_delay_ms: self.backoff_base_ms,
            max_delay_ms: self.backoff_max_ms,
            jitter_ms: self.backoff_jitter_ms,
        }
    }

    /// A service is configured once it has a base URL
    pub fn is_configured(&self) -> bool {
        self.base_url
            .as_deref()
            .map(|url| !url.trim().is_empty())
            .unwrap_or(false)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.retry_attempts < 1 {
            return Err(Error::Config(format!("{}: retry_attempts must be >= 1", name)));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(Error::Config(format!(
                "{}: backoff_max_ms ({}) must be >= backoff_base_ms ({})",
                name, self.backoff_max_ms, self.backoff_base_ms
            )));
        }
        if !self.timeout_seconds.is_finite()
            || self.timeout_seconds <= 0.0
            || self.timeout_seconds > MAX_TIMEOUT_SECONDS
        {
            return Err(Error::Config(format!(
                "{}: timeout_seconds must be > 0 and <= {}, got {}",
                name, MAX_TIMEOUT_SECONDS, self.timeout_seconds
            )));
        }
        if self.rate_limit_per_second == Some(0) {
            return Err(Error::Config(format!("{}: rate_limit_per_second must be > 0", name)));
        }
        Ok(())
    }

    fn apply_env(&mut self, prefix: &str) -> Result<()> {
        if let Some(url) = env_string(&format!("{}_API_URL", prefix)) {
            self.base_url = Some(url);
        }
        if let Some(key) = env_string(&format!("{}_API_KEY", prefix)) {
            self.api_key = Some(key);
        }
        if let Some(timeout) = env_parse::<f64>(&format!("{}_TIMEOUT_SEC", prefix))? {
            self.timeout_seconds = timeout;
        }
        if let Some(attempts) = env_parse::<u32>(&format!("{}_RETRIES", prefix))? {
            self.retry_attempts = attempts;
        }
        if let Some(base) = env_parse::<u64>(&format!("{}_BACKOFF_BASE_MS", prefix))? {
            self.backoff_base_ms = base;
        }
        if let Some(max) = env_parse::<u64>(&format!("{}_BACKOFF_MAX_MS", prefix))? {
            self.backoff_max_ms = max;
        }
        if let Some(jitter) = env_parse::<u64>(&format!("{}_BACKOFF_JITTER_MS", prefix))? {
            self.backoff_jitter_ms = jitter;
        }
        Ok(())
    }
}

/// Retry policy values as plain numbers (all milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
}

/// Classification result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Memory tier capacity (entries); 0 disables the memory tier
    pub memory_capacity: usize,
    /// Disk tier directory (defaults to the platform cache dir)
    pub dir: Option<PathBuf>,
    /// Disk entries older than this are treated as absent
    pub max_age_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_capacity: 500,
            dir: None,
            max_age_hours: 168,
        }
    }
}

impl CacheConfig {
    /// Resolved disk tier directory
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|d| d.join("catfix").join("classification"))
                .unwrap_or_else(|| PathBuf::from("cache").join("classification"))
        })
    }
}

impl AppConfig {
    /// Parse a TOML document; missing keys fall back to compiled defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load configuration from file (if any) and environment, then validate
    ///
    /// An explicitly requested file that does not exist is an error; a missing
    /// default file only produces a warning.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Read config {} failed: {}", path.display(), e))
                })?;
                info!("Configuration loaded from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CATFIX_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(threshold) = env_parse::<f64>("CATFIX_CONFIDENCE_THRESHOLD")? {
            self.confidence_threshold = threshold;
        }
        if let Some(concurrency) = env_parse::<usize>("CATFIX_CONCURRENCY")? {
            self.concurrency = concurrency;
        }
        if let Some(use_mocks) = env_bool("CATFIX_USE_MOCKS") {
            self.use_mocks = use_mocks;
        }
        if let Some(profile) = env_string("CATFIX_MOCK_PROFILE") {
            self.mock_profile = profile.to_lowercase();
        }
        if let Some(seed) = env_parse::<u64>("CATFIX_SEED")? {
            self.seed = seed;
        }
        if let Some(level) = env_string("CATFIX_LOG_LEVEL") {
            self.logging.level = level.to_lowercase();
        }
        if let Some(dir) = env_string("CATFIX_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }

        self.catalog.apply_env("CATFIX_CATALOG")?;
        self.secondary.apply_env("CATFIX_SECONDARY")?;
        self.classification.apply_env("CATFIX_LLM")?;
        Ok(())
    }

    /// Validate value ranges and required settings
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be between 0.0 and 1.0, got {}",
                self.confidence_threshold
            )));
        }
        if self.concurrency < 1 {
            return Err(Error::Config("concurrency must be >= 1".to_string()));
        }
        if !VALID_MOCK_PROFILES.contains(&self.mock_profile.as_str()) {
            return Err(Error::Config(format!(
                "mock_profile must be one of {:?}, got: {}",
                VALID_MOCK_PROFILES, self.mock_profile
            )));
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "logging.level must be one of {:?}, got: {}",
                VALID_LOG_LEVELS, self.logging.level
            )));
        }

        self.catalog.validate("catalog")?;
        self.secondary.validate("secondary")?;
        self.classification.validate("classification")?;

        if !self.use_mocks {
            let mut missing = Vec::new();
            if !self.catalog.is_configured() {
                missing.push("catalog.base_url (CATFIX_CATALOG_API_URL)");
            }
            if self.catalog.api_key.as_deref().map(str::trim).unwrap_or("").is_empty() {
                missing.push("catalog.api_key (CATFIX_CATALOG_API_KEY)");
            }
            if !missing.is_empty() {
                return Err(Error::Config(format!(
                    "Missing required settings for real catalog integration: {}",
                    missing.join(", ")
                )));
            }
        }

        Ok(())
    }
}

/// Locate the config file: CLI argument → `CATFIX_CONFIG` → user config dir
///
/// Explicit locations are returned even when missing so that the caller reports
/// the error; the implicit user location is only returned when it exists.
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    if let Some(path) = env_string(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    default_config_path().filter(|p| p.exists())
}

/// `~/.config/catfix/catfix.toml` (platform config dir)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("catfix").join("catfix.toml"))
}

/// Write compiled defaults plus `CATFIX_*` overrides to `path`
///
/// # Errors
/// `Config` when `path` already exists and `overwrite` is false, or when an
/// override does not parse
pub fn init_config_file(path: &Path, overwrite: bool) -> Result<AppConfig> {
    if path.exists() && !overwrite {
        return Err(Error::Config(format!("{} already exists", path.display())));
    }

    let mut config = AppConfig::default();
    config.apply_env_overrides()?;
    write_toml_config(&config, path)?;
    info!("Configuration written to {}", path.display());
    Ok(config)
}

/// Write configuration to a TOML file (temp file + rename)
pub fn write_toml_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|raw| matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_string(name) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| {
                Error::Config(format!("Environment variable {} has invalid value: {}", name, raw))
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.confidence_threshold, 0.7);
        assert_eq!(config.catalog.retry().attempts, 3);
        assert_eq!(config.classification.timeout_seconds, 15.0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            confidence_threshold = 0.5

            [catalog]
            base_url = "https://catalog.example/api"
            retry_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.catalog.retry_attempts, 5);
        assert_eq!(config.catalog.backoff_base_ms, 100);
        assert!(config.catalog.is_configured());
        assert!(!config.secondary.is_configured());
        assert_eq!(config.cache.memory_capacity, 500);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let config = AppConfig {
            confidence_threshold: 1.5,
            ..AppConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_backoff_max_below_base_rejected() {
        let mut config = AppConfig::default();
        config.secondary.backoff_base_ms = 500;
        config.secondary.backoff_max_ms = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("secondary"));
    }

    #[test]
    fn test_real_mode_requires_catalog_credentials() {
        let mut config = AppConfig {
            use_mocks: false,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        config.catalog.base_url = Some("https://catalog.example/api".to_string());
        config.catalog.api_key = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_mock_profile_rejected() {
        let config = AppConfig {
            mock_profile: "chaos".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_or_huge_timeout_rejected() {
        for timeout in [f64::INFINITY, f64::NAN, 0.0, -1.0, 1e300, MAX_TIMEOUT_SECONDS + 1.0] {
            let mut config = AppConfig::default();
            config.catalog.timeout_seconds = timeout;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("timeout_seconds"), "accepted {}", timeout);
        }

        let mut config = AppConfig::default();
        config.catalog.timeout_seconds = MAX_TIMEOUT_SECONDS;
        assert!(config.validate().is_ok());
    }
}
