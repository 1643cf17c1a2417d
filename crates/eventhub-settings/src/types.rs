//! Settings type definitions.
//!
//! All types use camelCase JSON field names and `#[serde(default)]`, so a
//! partial settings file only needs the values it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Shortest accepted brute-force interval, in seconds.
pub const BRUTE_FORCE_MIN_SECS: u64 = 3;
/// Longest accepted brute-force interval, in seconds.
pub const BRUTE_FORCE_MAX_SECS: u64 = 60;

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090, "basePath": "/hub" },
///   "driver": { "forceAuthentication": true }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// HTTP listener and transport settings.
    pub server: ServerSettings,
    /// Event driver behaviour.
    pub driver: DriverSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl HubSettings {
    /// Check cross-field constraints the types cannot express.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if !server.base_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.basePath must start with '/': {}",
                server.base_path
            )));
        }
        if server.port == 0 {
            return Err(SettingsError::InvalidValue("server.port must not be 0".into()));
        }
        if server.socket_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "server.socketBuffer must not be 0".into(),
            ));
        }
        if !(BRUTE_FORCE_MIN_SECS..=BRUTE_FORCE_MAX_SECS)
            .contains(&self.driver.brute_force_interval_secs)
        {
            return Err(SettingsError::InvalidValue(format!(
                "driver.bruteForceIntervalSecs must be within {BRUTE_FORCE_MIN_SECS}..={BRUTE_FORCE_MAX_SECS}: {}",
                self.driver.brute_force_interval_secs
            )));
        }
        Ok(())
    }
}

/// HTTP listener and transport settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Path prefix of the `Sockets`, `Events` and `Polling` endpoints.
    pub base_path: String,
    /// SSE keep-alive comment interval in milliseconds.
    pub sse_keep_alive_ms: u64,
    /// How long a long-poll request is parked before an empty answer.
    pub poll_timeout_ms: u64,
    /// WebSocket ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Outbound frames buffered per socket or stream.
    pub socket_buffer: usize,
    /// Origins allowed by CORS; empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_path: "/eventhub".to_string(),
            sse_keep_alive_ms: 5_000,
            poll_timeout_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            socket_buffer: 256,
            allowed_origins: Vec::new(),
        }
    }
}

/// Event driver behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverSettings {
    /// Reconnects from one sender within this many seconds are refused.
    pub brute_force_interval_secs: u64,
    /// Channels found by URL routing still need a matching cookie.
    pub force_authentication: bool,
    /// Lifetime in minutes of the refreshed channel cookie; 0 disables.
    pub cookie_timeout_minutes: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            brute_force_interval_secs: 10,
            force_authentication: false,
            cookie_timeout_minutes: 0,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
