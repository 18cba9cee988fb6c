use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listening server, the connection hub and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub logging: LoggingSettings,
}

/// Configuration settings for the server.
///
/// Defines the host and port the server will bind to, and the query
/// parameter the default identity resolver reads the owner identity from.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub identity_param: String,
}

/// Configuration settings for the connection hub.
///
/// Controls liveness probing, per-connection queue bounds, admission and the
/// advisory resource ceiling.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HubSettings {
    pub heartbeat_interval_ms: u64,
    pub liveness_timeout_multiple: u32,
    pub liveness_scan_interval_ms: Option<u64>,
    pub outbound_queue_capacity: usize,
    pub max_connections: usize,
    pub resource_alert_ceiling: usize,
    pub resource_sample_interval_ms: u64,
    pub shutdown_grace_ms: u64,
}

/// Logging output settings.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl HubSettings {
    /// Period of the outbound liveness probe.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Silence after which a connection is evicted.
    pub fn liveness_timeout(&self) -> Duration {
        self.heartbeat_interval() * self.liveness_timeout_multiple
    }

    /// Period of the liveness monitor scan. Defaults to the heartbeat interval.
    pub fn liveness_scan_interval(&self) -> Duration {
        self.liveness_scan_interval_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.heartbeat_interval())
    }

    pub fn resource_sample_interval(&self) -> Duration {
        Duration::from_millis(self.resource_sample_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Rejects values the hub cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(invalid("hub.heartbeat_interval_ms must be greater than zero"));
        }
        if self.liveness_timeout_multiple < 1 {
            return Err(invalid("hub.liveness_timeout_multiple must be at least 1"));
        }
        if self.liveness_scan_interval_ms == Some(0) {
            return Err(invalid("hub.liveness_scan_interval_ms must be greater than zero"));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(invalid("hub.outbound_queue_capacity must be greater than zero"));
        }
        if self.max_connections == 0 {
            return Err(invalid("hub.max_connections must be greater than zero"));
        }
        if self.resource_sample_interval_ms == 0 {
            return Err(invalid("hub.resource_sample_interval_ms must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Message(message.to_string())
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub hub: Option<PartialHubSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

/// Partial server settings.
///
/// Used when loading server configuration from external sources with optional values.
#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub identity_param: Option<String>,
}

/// Partial hub settings.
#[derive(Debug, Deserialize)]
pub struct PartialHubSettings {
    pub heartbeat_interval_ms: Option<u64>,
    pub liveness_timeout_multiple: Option<u32>,
    pub liveness_scan_interval_ms: Option<u64>,
    pub outbound_queue_capacity: Option<usize>,
    pub max_connections: Option<usize>,
    pub resource_alert_ceiling: Option<usize>,
    pub resource_sample_interval_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
    pub json: Option<bool>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            liveness_timeout_multiple: 2,
            liveness_scan_interval_ms: None,
            outbound_queue_capacity: 256,
            max_connections: 1000,
            resource_alert_ceiling: 10_000,
            resource_sample_interval_ms: 30_000,
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                identity_param: "player_id".to_string(),
            },
            hub: HubSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let server = self.server;
        let hub = self.hub;
        let logging = self.logging;
        let d = defaults;

        Settings {
            server: ServerSettings {
                host: server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(d.server.host),
                port: server.as_ref().and_then(|s| s.port).unwrap_or(d.server.port),
                identity_param: server
                    .as_ref()
                    .and_then(|s| s.identity_param.clone())
                    .unwrap_or(d.server.identity_param),
            },
            hub: HubSettings {
                heartbeat_interval_ms: hub
                    .as_ref()
                    .and_then(|h| h.heartbeat_interval_ms)
                    .unwrap_or(d.hub.heartbeat_interval_ms),
                liveness_timeout_multiple: hub
                    .as_ref()
                    .and_then(|h| h.liveness_timeout_multiple)
                    .unwrap_or(d.hub.liveness_timeout_multiple),
                liveness_scan_interval_ms: hub
                    .as_ref()
                    .and_then(|h| h.liveness_scan_interval_ms)
                    .or(d.hub.liveness_scan_interval_ms),
                outbound_queue_capacity: hub
                    .as_ref()
                    .and_then(|h| h.outbound_queue_capacity)
                    .unwrap_or(d.hub.outbound_queue_capacity),
                max_connections: hub
                    .as_ref()
                    .and_then(|h| h.max_connections)
                    .unwrap_or(d.hub.max_connections),
                resource_alert_ceiling: hub
                    .as_ref()
                    .and_then(|h| h.resource_alert_ceiling)
                    .unwrap_or(d.hub.resource_alert_ceiling),
                resource_sample_interval_ms: hub
                    .as_ref()
                    .and_then(|h| h.resource_sample_interval_ms)
                    .unwrap_or(d.hub.resource_sample_interval_ms),
                shutdown_grace_ms: hub
                    .as_ref()
                    .and_then(|h| h.shutdown_grace_ms)
                    .unwrap_or(d.hub.shutdown_grace_ms),
            },
            logging: LoggingSettings {
                level: logging
                    .as_ref()
                    .and_then(|l| l.level.clone())
                    .unwrap_or(d.logging.level),
                json: logging.as_ref().and_then(|l| l.json).unwrap_or(d.logging.json),
            },
        }
    }
}
