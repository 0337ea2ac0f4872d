//! Device session configuration.
//!
//! A [`DeviceConfig`] names the device, the hub it talks to, and exactly one
//! authentication source. Validation happens synchronously in
//! [`DeviceConfig::validate`] before a session is created; a config that
//! fails validation produces no side effects anywhere else.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Maximum accepted device id length, in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 128;

/// Device configuration.
///
/// Authentication is selected by which credential fields are present: a
/// `device_key` means key-derived tokens, a `sas_token` means the caller
/// supplies the token, and neither means x509 certificate authentication
/// (the certificate itself is provided later via `set_option`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    /// Device identifier (non-empty, at most 128 characters).
    pub device_id: String,
    /// Hub name, the first label of the broker host name.
    pub hub_name: String,
    /// Hub DNS suffix, e.g. `example-hub.net`.
    pub hub_suffix: String,
    /// Optional protocol gateway host; overrides `{hub_name}.{hub_suffix}`.
    #[serde(default)]
    pub gateway_host: Option<String>,
    /// Symmetric key used to derive time-limited tokens.
    #[serde(default)]
    pub device_key: Option<String>,
    /// Caller-supplied shared-access token, used as-is.
    #[serde(default)]
    pub sas_token: Option<String>,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),
    #[error("both device_key and sas_token are set; only one credential may be used")]
    ConflictingCredentials,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load a configuration from a TOML file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DeviceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration without side effects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::InvalidDeviceId("device id is empty".into()));
        }
        if self.device_id.len() > MAX_DEVICE_ID_LEN {
            return Err(ConfigError::InvalidDeviceId(format!(
                "device id is {} characters, limit is {MAX_DEVICE_ID_LEN}",
                self.device_id.len()
            )));
        }
        if self.hub_name.is_empty() {
            return Err(ConfigError::MissingField("hub_name"));
        }
        if self.hub_suffix.is_empty() {
            return Err(ConfigError::MissingField("hub_suffix"));
        }
        match (&self.device_key, &self.sas_token) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingCredentials),
            (Some(key), None) if key.is_empty() => {
                return Err(ConfigError::InvalidConfig("device_key is empty".into()))
            }
            (None, Some(token)) if token.is_empty() => {
                return Err(ConfigError::InvalidConfig("sas_token is empty".into()))
            }
            _ => {}
        }
        Ok(())
    }

    /// Broker host name: the gateway host when configured, otherwise
    /// `{hub_name}.{hub_suffix}`.
    pub fn host(&self) -> String {
        match &self.gateway_host {
            Some(gateway) => gateway.clone(),
            None => format!("{}.{}", self.hub_name, self.hub_suffix),
        }
    }

    /// Create a minimal key-authenticated test configuration.
    #[cfg(test)]
    pub fn test_config() -> Self {
        DeviceConfig {
            device_id: "test-device".to_string(),
            hub_name: "unit-hub".to_string(),
            hub_suffix: "example-hub.net".to_string(),
            gateway_host: None,
            device_key: Some("c3VwZXJzZWNyZXQ=".to_string()),
            sas_token: None,
        }
    }
}
