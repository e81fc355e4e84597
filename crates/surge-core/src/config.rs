//! Typed configuration for the manager and for individual endpoints.
//!
//! Both scopes follow the same rule: `Default` supplies every value,
//! and whatever the operator provides overrides field by field
//! (`#[serde(default)]` everywhere). Endpoint configuration lives in
//! the coordination store as JSON bytes; manager configuration is a
//! TOML file next to the daemon.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Manager-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Seconds between convergence ticks when the mailbox is idle.
    pub tick_interval_secs: u64,
    /// Ring-log buffer size in bytes.
    pub eventlog_capacity: usize,
    /// Worker pool bounds.
    pub pool: PoolSettings,
}

/// Bounds for the demand-grown worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolSettings {
    /// Hard cap on worker threads.
    pub max_workers: usize,
    /// Queue depth at which `submit` starts rejecting once the pool is
    /// at its worker cap.
    pub max_pending: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            eventlog_capacity: 64 * 1024,
            pool: PoolSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_workers: 16,
            max_pending: 256,
        }
    }
}

impl ManagerConfig {
    /// Load from a TOML file, defaults filling any omitted field.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ManagerConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Per-endpoint scaling configuration.
///
/// `template_id` has no default: an endpoint without a template cannot
/// be provisioned, so its absence is a configuration error at parse
/// time rather than a failure discovered mid-launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Instance template the provisioning client blesses and launches.
    pub template_id: String,
    /// Public URL the load balancer serves this endpoint on.
    #[serde(default)]
    pub url: Option<String>,
    /// Ordered scaling policy clauses, e.g. `"20<=rate<=50"`.
    #[serde(default)]
    pub rules: Vec<String>,
    /// Floor on the instance count.
    #[serde(default = "default_min_instances")]
    pub min_instances: u32,
    /// Ceiling on the instance count.
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    /// Maximum launch/delete actions per convergence tick.
    #[serde(default = "default_ramp_limit")]
    pub ramp_limit: u32,
}

fn default_min_instances() -> u32 {
    1
}

fn default_max_instances() -> u32 {
    1
}

fn default_ramp_limit() -> u32 {
    5
}

impl EndpointConfig {
    /// Parse endpoint configuration from store bytes (JSON).
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let config: EndpointConfig = serde_json::from_slice(bytes)?;
        Ok(config)
    }

    /// Minimal config for a template, everything else defaulted.
    pub fn for_template(template_id: &str) -> Self {
        Self {
            template_id: template_id.to_string(),
            url: None,
            rules: Vec::new(),
            min_instances: default_min_instances(),
            max_instances: default_max_instances(),
            ramp_limit: default_ramp_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manager_config_defaults() {
        let config: ManagerConfig = toml::from_str("").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.tick_interval_secs, 30);
        assert_eq!(config.pool.max_workers, 16);
    }

    #[test]
    fn manager_config_partial_override() {
        let config: ManagerConfig = toml::from_str(
            r#"
tick_interval_secs = 5

[pool]
max_workers = 4
"#,
        )
        .unwrap();
        assert_eq!(config.tick_interval_secs, 5);
        assert_eq!(config.pool.max_workers, 4);
        // Untouched fields keep their defaults.
        assert_eq!(config.pool.max_pending, 256);
        assert_eq!(config.eventlog_capacity, 64 * 1024);
    }

    #[test]
    fn endpoint_config_defaults() {
        let config =
            EndpointConfig::from_slice(br#"{"template_id": "tmpl-1"}"#).unwrap();
        assert_eq!(config.template_id, "tmpl-1");
        assert_eq!(config.min_instances, 1);
        assert_eq!(config.max_instances, 1);
        assert_eq!(config.ramp_limit, 5);
        assert!(config.rules.is_empty());
        assert!(config.url.is_none());
    }

    #[test]
    fn endpoint_config_missing_template_is_an_error() {
        assert!(EndpointConfig::from_slice(br#"{"rules": []}"#).is_err());
    }

    #[test]
    fn endpoint_config_full() {
        let config = EndpointConfig::from_slice(
            br#"{
                "template_id": "tmpl-9",
                "url": "http://api.example.com",
                "rules": ["20<=rate<=50", "instances<=8"],
                "min_instances": 2,
                "max_instances": 10,
                "ramp_limit": 3
            }"#,
        )
        .unwrap();
        assert_eq!(config.url.as_deref(), Some("http://api.example.com"));
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.min_instances, 2);
        assert_eq!(config.max_instances, 10);
        assert_eq!(config.ramp_limit, 3);
    }
}
