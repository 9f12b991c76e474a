use crate::config::{Site, SiteList};
use crate::error::ConfigError;
use crate::triggers::AlertThreshold;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding `probe.username`
pub const USERNAME_ENV: &str = "TELEPING_PROBE_USERNAME";
/// Environment variable overriding `probe.token`
pub const TOKEN_ENV: &str = "TELEPING_PROBE_TOKEN";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub probe: ProbeConfig,
    pub alerts: AlertsConfig,
    pub check: CheckConfig,
    pub sites: Vec<Site>,
}

/// Probe service connection and retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Host and port of the WebSocket endpoint
    pub host: String,
    pub username: String,
    /// API secret used to sign the session URL
    pub token: String,
    /// Session attempts per site
    pub retries: u32,
    pub retry_backoff_seconds: u64,
    /// Silence tolerated on one read before polling again
    pub read_timeout_seconds: u64,
    /// Budget for collecting results once the request is sent
    pub session_timeout_seconds: u64,
    /// Per-node HTTP timeout the vendor applies
    pub test_timeout_seconds: u64,
    pub nodes: NodeSelection,
}

/// Which vantage points the probe service should use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSelection {
    /// Province ids
    pub pro_ids: Vec<u32>,
    /// ISP ids (1 = Telecom, 2 = Unicom, 7 = Mobile)
    pub isps: Vec<u32>,
    pub nodetype: Vec<u32>,
    pub areas: Vec<u32>,
    /// Nodes per province/ISP combination
    pub num: u32,
}

/// Alert threshold and delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Fail-rate above which a site alerts
    pub threshold: f64,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

/// Interactive check settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Wall-clock budget for a full check pass
    pub deadline_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "wsapi.17ce.com:8001".to_string(),
            username: String::new(),
            token: String::new(),
            retries: 3,
            retry_backoff_seconds: 5,
            read_timeout_seconds: 5,
            session_timeout_seconds: 60,
            test_timeout_seconds: 20,
            nodes: NodeSelection::default(),
        }
    }
}

impl Default for NodeSelection {
    fn default() -> Self {
        // Guangdong, Beijing, Shanghai
        Self {
            pro_ids: vec![180, 221, 195],
            isps: vec![1, 2],
            nodetype: vec![1],
            areas: vec![1],
            num: 1,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            threshold: 0.20,
            telegram_bot_token: None,
            telegram_chat_id: None,
        }
    }
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            deadline_seconds: 180,
        }
    }
}

impl ProbeConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }

    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.token.is_empty()
    }
}

impl AlertsConfig {
    /// Validated threshold; out-of-range values fall back to the default
    pub fn threshold(&self) -> AlertThreshold {
        AlertThreshold::new(self.threshold)
    }
}

impl CheckConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_seconds)
    }
}

impl Config {
    /// Load configuration from a TOML file, apply environment overrides
    /// and validate the result
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::parse(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without validating it
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path`, falling back to defaults when no path is given or
    /// the file cannot be read. Parse and validation errors are returned.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                info!("Loading configuration from: {}", path.display());
                match Self::from_file(path) {
                    Err(ConfigError::ReadError(e)) => {
                        warn!("Configuration file not found or unreadable ({}), using defaults", e);
                        Self::defaults_from_env()
                    }
                    result => result,
                }
            }
            None => {
                info!("Using default configuration");
                Self::defaults_from_env()
            }
        }
    }

    fn defaults_from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to `path` as TOML
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .map_err(|e| ConfigError::WriteError(format!("{}: {}", path.display(), e)))?;
        debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Run `edit` against the sites stored in `path`, then write them back
    ///
    /// The file is read without environment overrides so credentials taken
    /// from the environment never end up on disk. A missing file starts
    /// from the defaults.
    pub fn edit_sites<F, T>(path: &Path, edit: F) -> Result<T, ConfigError>
    where
        F: FnOnce(&SiteList) -> T,
    {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
            Self::parse(&content)?
        } else {
            info!("Creating configuration file {}", path.display());
            Self::default()
        };

        let sites = SiteList::new(std::mem::take(&mut config.sites));
        let result = edit(&sites);
        config.sites = sites.snapshot();

        config.validate()?;
        config.save(path)?;
        Ok(result)
    }

    /// Replace credentials with values from `lookup` when present and non-empty
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = lookup(USERNAME_ENV).filter(|v| !v.is_empty()) {
            self.probe.username = username;
        }
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.probe.token = token;
        }
    }

    /// Reject settings the probe session cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probe = &self.probe;

        if probe.host.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "probe.host must not be empty".to_string(),
            ));
        }

        let nonzero = [
            ("probe.retries", probe.retries as u64),
            ("probe.read_timeout_seconds", probe.read_timeout_seconds),
            ("probe.session_timeout_seconds", probe.session_timeout_seconds),
            ("probe.test_timeout_seconds", probe.test_timeout_seconds),
            ("probe.nodes.num", probe.nodes.num as u64),
            ("check.deadline_seconds", self.check.deadline_seconds),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be greater than zero",
                name
            )));
        }

        if probe.nodes.pro_ids.is_empty() || probe.nodes.isps.is_empty() {
            return Err(ConfigError::ValidationError(
                "probe.nodes must select at least one province and one ISP".to_string(),
            ));
        }

        if let Some(site) = self.sites.iter().find(|s| s.url.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "site '{}' has an empty url",
                site.name
            )));
        }

        Ok(())
    }
}
