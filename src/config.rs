//! Configuration management.
//!
//! Defaults are defined here; `main.rs` layers command-line/environment
//! overrides on top via clap.

use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Scheduler tuning knobs.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Collaborator endpoints.
    #[serde(default)]
    pub collaborators: CollaboratorConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Missions claimed per drain cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Claimed missions processed concurrently within a drain cycle.
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: usize,
    /// Lease duration granted on claim, in seconds.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
    /// Fallback drain interval, in seconds.
    #[serde(default = "default_drain_interval")]
    pub drain_interval_secs: u64,
    /// Lease reaper interval, in seconds.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
    /// Per-user cap on missions in pending or leased state.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight_per_user: u32,
}

fn default_batch_size() -> usize {
    5
}

fn default_concurrency() -> usize {
    8
}

fn default_lease_secs() -> i64 {
    180
}

fn default_drain_interval() -> u64 {
    60
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_max_in_flight() -> u32 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            worker_concurrency: default_concurrency(),
            lease_secs: default_lease_secs(),
            drain_interval_secs: default_drain_interval(),
            reaper_interval_secs: default_reaper_interval(),
            max_in_flight_per_user: default_max_in_flight(),
        }
    }
}

/// Endpoints of the external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorConfig {
    /// Base URL of the price oracle / market-data service.
    #[serde(default = "default_oracle_url")]
    pub oracle_url: String,
    /// Base URL of the execution service.
    #[serde(default = "default_executor_url")]
    pub executor_url: String,
    /// Base URL of the activity sink.
    #[serde(default = "default_activity_url")]
    pub activity_url: String,
    /// Canonical identifier of the quote asset swaps trade against.
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
}

fn default_oracle_url() -> String {
    "http://localhost:9100".to_string()
}

fn default_executor_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_activity_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_quote_asset() -> String {
    // wSOL mint; overridable for other venues.
    "So11111111111111111111111111111111111111112".to_string()
}

impl Default for CollaboratorConfig {
    fn default() -> Self {
        Self {
            oracle_url: default_oracle_url(),
            executor_url: default_executor_url(),
            activity_url: default_activity_url(),
            quote_asset: default_quote_asset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_scheduler_contract() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.batch_size, 5);
        assert_eq!(cfg.worker_concurrency, 8);
        assert_eq!(cfg.lease_secs, 180);
        assert_eq!(cfg.drain_interval_secs, 60);
        assert_eq!(cfg.reaper_interval_secs, 60);
        assert_eq!(cfg.max_in_flight_per_user, 5);
    }
}
