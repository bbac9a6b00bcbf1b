//! Configuration management for the Commvault exporter.
//!
//! Supports loading configuration from:
//! - TOML configuration files
//! - Environment variables (with `COMMVAULT_EXPORTER_` prefix and `__` as the
//!   nesting separator, e.g. `COMMVAULT_EXPORTER__TARGETS__PROD__PASSWORD`)
//! - Command-line arguments (config file path only)

use crate::error::{CommvaultError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// A metric category that can be collected from a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Backup job status for VSA and SQL jobs
    Jobs,
    /// VM pseudo-client and SQL instance status
    Clients,
    /// CommServe identity (name and version)
    SystemInfo,
}

impl Category {
    /// Every category, in collection order.
    pub const ALL: [Category; 3] = [Category::Jobs, Category::Clients, Category::SystemInfo];

    /// Label value used in `commvault_scrape_category_success`.
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Jobs => "jobs",
            Category::Clients => "clients",
            Category::SystemInfo => "system_info",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for one Commvault server.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Target name, taken from the key under `[targets]`
    #[serde(skip)]
    pub name: String,

    /// Commvault web API base URL (e.g., "https://commserve/webconsole/api")
    pub api_url: String,

    /// Login user name
    #[serde(default)]
    pub username: String,

    /// Login password (sent base64-encoded to `/Login`)
    #[serde(default)]
    pub password: String,

    /// Pre-provisioned token; when set the exporter never calls `/Login`
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Verify TLS certificates (disable only for self-signed CommServe certs)
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    /// Per-request timeout in seconds
    #[serde(default = "default_target_timeout")]
    pub timeout_seconds: u64,

    /// Version string reported in `commvault_info`, overrides the API value
    #[serde(default)]
    pub version: Option<String>,

    /// Display name reported in `commvault_info`, overrides the API value
    #[serde(default)]
    pub commserve_name: Option<String>,

    /// Metric categories collected on each probe
    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,

    /// How far back finished jobs are looked up, in seconds
    #[serde(default = "default_job_lookback")]
    pub job_lookback_seconds: u64,

    /// Maximum number of jobs requested per probe
    #[serde(default = "default_job_limit")]
    pub job_limit: u32,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &"***REDACTED***")
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "***REDACTED***"),
            )
            .field("verify_ssl", &self.verify_ssl)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("version", &self.version)
            .field("commserve_name", &self.commserve_name)
            .field("categories", &self.categories)
            .field("job_lookback_seconds", &self.job_lookback_seconds)
            .field("job_limit", &self.job_limit)
            .finish()
    }
}

impl TargetConfig {
    /// Create a target with default options.
    pub fn new(name: &str, api_url: &str, username: &str, password: &str) -> Self {
        Self {
            name: name.to_string(),
            api_url: api_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            auth_token: None,
            verify_ssl: default_verify_ssl(),
            timeout_seconds: default_target_timeout(),
            version: None,
            commserve_name: None,
            categories: default_categories(),
            job_lookback_seconds: default_job_lookback(),
            job_limit: default_job_limit(),
        }
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Whether `category` is collected for this target.
    pub fn is_enabled(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    fn validate(&self) -> Result<()> {
        if self.api_url.trim().is_empty() {
            return Err(config_error(format!(
                "target '{}': api_url cannot be empty",
                self.name
            )));
        }

        let has_token = self.auth_token.as_deref().is_some_and(|t| !t.is_empty());
        if !has_token && (self.username.is_empty() || self.password.is_empty()) {
            return Err(config_error(format!(
                "target '{}': username/password or auth_token is required",
                self.name
            )));
        }

        if self.timeout_seconds == 0 {
            return Err(config_error(format!(
                "target '{}': timeout_seconds must be greater than 0",
                self.name
            )));
        }

        if self.categories.is_empty() {
            return Err(config_error(format!(
                "target '{}': at least one category must be enabled",
                self.name
            )));
        }

        Ok(())
    }
}

/// Exporter specific settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExporterConfig {
    /// Address to listen on for the probe endpoint
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Settings shared by every probe.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Upper bound for a whole probe (authentication plus collection)
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,
    /// How long a session token is reused before logging in again
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,
    /// Subtracted from Prometheus' scrape timeout header to leave room for the response
    #[serde(default = "default_scrape_timeout_offset")]
    pub scrape_timeout_offset_seconds: f64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_probe_timeout(),
            session_ttl_seconds: default_session_ttl(),
            scrape_timeout_offset_seconds: default_scrape_timeout_offset(),
        }
    }
}

impl ProbeConfig {
    /// Configured probe deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Session lifetime.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    /// Effective probe deadline given Prometheus' scrape timeout header, if any.
    pub fn deadline_for(&self, scrape_timeout_seconds: Option<f64>) -> Duration {
        let configured = self.timeout();
        match scrape_timeout_seconds {
            Some(header) if header.is_finite() && header > 0.0 => {
                let budget = (header - self.scrape_timeout_offset_seconds).max(0.0);
                configured.min(Duration::from_secs_f64(budget))
            }
            _ => configured,
        }
    }
}

/// Main configuration structure for the Commvault exporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Exporter server configuration
    #[serde(default)]
    pub exporter: ExporterConfig,

    /// Probe behaviour
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Commvault servers, keyed by the name used in `/probe?target=`
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

fn default_verify_ssl() -> bool {
    true
}

fn default_target_timeout() -> u64 {
    10
}

fn default_categories() -> Vec<Category> {
    Category::ALL.to_vec()
}

fn default_job_lookback() -> u64 {
    86_400
}

fn default_job_limit() -> u32 {
    1000
}

fn default_listen_address() -> String {
    "0.0.0.0:9657".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_probe_timeout() -> u64 {
    25
}

fn default_session_ttl() -> u64 {
    1800
}

fn default_scrape_timeout_offset() -> f64 {
    0.5
}

fn config_error(message: String) -> CommvaultError {
    CommvaultError::Config(config::ConfigError::Message(message))
}

impl Settings {
    /// Load configuration from a file and environment variables.
    ///
    /// # Arguments
    ///
    /// * `config_path` - Optional path to configuration file
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use commvault_exporter::config::Settings;
    ///
    /// let settings = Settings::load(Some("config/config.toml")).unwrap();
    /// ```
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("COMMVAULT_EXPORTER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let settings: Settings = config.try_deserialize()?;

        settings.finish()
    }

    /// Fill in target names from their keys and validate.
    fn finish(mut self) -> Result<Self> {
        for (name, target) in self.targets.iter_mut() {
            target.name = name.clone();
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate configuration settings.
    fn validate(&self) -> Result<()> {
        if self.probe.timeout_seconds == 0 {
            return Err(config_error(
                "probe.timeout_seconds must be greater than 0".to_string(),
            ));
        }

        for target in self.targets.values() {
            target.validate()?;
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exporter: ExporterConfig::default(),
            probe: ProbeConfig::default(),
            targets: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Settings> {
        let config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;
        let settings: Settings = config.try_deserialize()?;
        settings.finish()
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.exporter.listen_address, "0.0.0.0:9657");
        assert_eq!(settings.exporter.log_format, LogFormat::Text);
        assert_eq!(settings.probe.timeout_seconds, 25);
        assert_eq!(settings.probe.session_ttl_seconds, 1800);
        assert!(settings.targets.is_empty());
    }

    #[test]
    fn test_target_defaults_and_name_from_key() {
        let settings = parse(
            r#"
            [targets.prod]
            api_url = "https://cs.example.com/webconsole/api"
            username = "admin"
            password = "secret"
            "#,
        )
        .unwrap();

        let prod = &settings.targets["prod"];
        assert_eq!(prod.name, "prod");
        assert!(prod.verify_ssl);
        assert_eq!(prod.timeout_seconds, 10);
        assert_eq!(prod.categories, Category::ALL.to_vec());
        assert_eq!(prod.job_limit, 1000);
    }

    #[test]
    fn test_categories_subset() {
        let settings = parse(
            r#"
            [targets.lab]
            api_url = "https://lab/webconsole/api"
            auth_token = "QSDK abc"
            categories = ["jobs", "system_info"]
            "#,
        )
        .unwrap();

        let lab = &settings.targets["lab"];
        assert!(lab.is_enabled(Category::Jobs));
        assert!(!lab.is_enabled(Category::Clients));
    }

    #[test]
    fn test_validation_fails_without_credentials() {
        let result = parse(
            r#"
            [targets.prod]
            api_url = "https://cs.example.com/webconsole/api"
            username = "admin"
            "#,
        );
        assert!(matches!(result, Err(CommvaultError::Config(_))));
    }

    #[test]
    fn test_validation_fails_with_empty_categories() {
        let result = parse(
            r#"
            [targets.prod]
            api_url = "https://cs.example.com/webconsole/api"
            auth_token = "QSDK abc"
            categories = []
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut target = TargetConfig::new("prod", "https://cs", "admin", "hunter2");
        target.auth_token = Some("QSDK topsecret".to_string());
        let rendered = format!("{:?}", target);
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn test_deadline_uses_scrape_timeout_header() {
        let probe = ProbeConfig::default();
        assert_eq!(probe.deadline_for(None), Duration::from_secs(25));
        assert_eq!(probe.deadline_for(Some(10.0)), Duration::from_secs_f64(9.5));
        assert_eq!(probe.deadline_for(Some(60.0)), Duration::from_secs(25));
        assert_eq!(probe.deadline_for(Some(-1.0)), Duration::from_secs(25));
    }
}
