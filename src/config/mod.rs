/// TOML configuration with defaults and environment overrides
pub mod settings;
/// Monitored sites and URL helpers
pub mod sites;

pub use settings::{AlertsConfig, CheckConfig, Config, NodeSelection, ProbeConfig};
pub use sites::{extract_domain, normalize_url, unique_name, Site, SiteList};
