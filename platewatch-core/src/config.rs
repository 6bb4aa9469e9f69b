use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::models::{DeviceEndpoint, DeviceId};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub fleet: FleetConfig,
    /// Devices to connect to at startup. The registration layer may add
    /// more at runtime.
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Device-fleet subsystem configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub tls: TlsConfig,
    pub signing: SigningConfig,
    pub reconnect: ReconnectConfig,
    pub relay: RelayConfig,
    pub session: SessionConfig,
}

/// Client TLS material for device connections.
///
/// Certificate, key and CA bundle are reloaded from these paths on every
/// reconnect attempt so rotated material is picked up without a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
    pub ca_path: String,
    /// Whether to verify the peer hostname in addition to the CA chain.
    /// Off by default: fleet devices carry certificates from a private CA
    /// and are addressed by IP.
    pub verify_hostname: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert_path: "/app/certs/client.crt".to_string(),
            key_path: "/app/certs/client.key".to_string(),
            ca_path: "/app/certs/ca.crt".to_string(),
            verify_hostname: false,
        }
    }
}

/// Outbound command signing configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// HMAC-SHA256 key for command integrity. Must be non-empty.
    pub hmac_key: String,
}

/// Exponential backoff policy for device reconnection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
    pub backoff_factor: f64,
    /// Fractional jitter added on top of each delay (0.1 = up to +10%)
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 2,
            max_delay_secs: 10,
            backoff_factor: 1.5,
            jitter: 0.1,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    #[must_use]
    pub const fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Relay hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Minimum interval between live-frame deliveries. Frames arriving
    /// faster are dropped, not queued.
    pub live_emit_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            live_emit_interval_ms: 1000,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub const fn live_emit_interval(&self) -> Duration {
        Duration::from_millis(self.live_emit_interval_ms)
    }
}

/// Device session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How long to wait for the authentication acknowledgment before the
    /// session is torn down and reconnection scheduled.
    pub handshake_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// One device entry in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub auth_token: String,
}

impl From<DeviceConfig> for DeviceEndpoint {
    fn from(device: DeviceConfig) -> Self {
        Self {
            id: DeviceId::from_string(device.id),
            host: device.host,
            port: device.port,
            auth_token: device.auth_token,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // Override with environment variables (PLATEWATCH_FLEET__SIGNING__HMAC_KEY, etc.)
        builder = builder.add_source(
            Environment::with_prefix("PLATEWATCH")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only (for Docker/K8s)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Validate the configuration, collecting every problem instead of
    /// stopping at the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.fleet.signing.hmac_key.is_empty() {
            errors.push("fleet.signing.hmac_key must not be empty".to_string());
        }
        if self.fleet.tls.cert_path.is_empty() {
            errors.push("fleet.tls.cert_path must not be empty".to_string());
        }
        if self.fleet.tls.key_path.is_empty() {
            errors.push("fleet.tls.key_path must not be empty".to_string());
        }
        if self.fleet.tls.ca_path.is_empty() {
            errors.push("fleet.tls.ca_path must not be empty".to_string());
        }
        if self.fleet.reconnect.backoff_factor < 1.0 {
            errors.push("fleet.reconnect.backoff_factor must be >= 1.0".to_string());
        }
        if self.fleet.reconnect.max_delay_secs < self.fleet.reconnect.initial_delay_secs {
            errors.push("fleet.reconnect.max_delay_secs must be >= initial_delay_secs".to_string());
        }
        if !(0.0..1.0).contains(&self.fleet.reconnect.jitter) {
            errors.push("fleet.reconnect.jitter must be in [0.0, 1.0)".to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for device in &self.devices {
            if device.id.is_empty() {
                errors.push("device id must not be empty".to_string());
            } else if !seen.insert(device.id.as_str()) {
                errors.push(format!("duplicate device id: {}", device.id));
            }
            if device.host.is_empty() {
                errors.push(format!("device {}: host must not be empty", device.id));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> Config {
        Config {
            fleet: FleetConfig {
                signing: SigningConfig {
                    hmac_key: "secret".to_string(),
                },
                ..FleetConfig::default()
            },
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config_validation_flags_empty_key() {
        let config = Config::default();
        let errors = config.validate().expect_err("empty hmac key must fail");
        assert!(errors.iter().any(|e| e.contains("hmac_key")));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_duplicate_device_ids_rejected() {
        let mut config = valid_config();
        let device = DeviceConfig {
            id: "lpr-1".to_string(),
            host: "10.0.0.5".to_string(),
            port: 9000,
            auth_token: "tok".to_string(),
        };
        config.devices = vec![device.clone(), device];

        let errors = config.validate().expect_err("duplicate ids must fail");
        assert!(errors.iter().any(|e| e.contains("duplicate device id")));
    }

    #[test]
    fn test_backoff_factor_below_one_rejected() {
        let mut config = valid_config();
        config.fleet.reconnect.backoff_factor = 0.5;

        let errors = config.validate().expect_err("factor < 1 must fail");
        assert!(errors.iter().any(|e| e.contains("backoff_factor")));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            concat!(
                "logging:\n",
                "  level: debug\n",
                "fleet:\n",
                "  signing:\n",
                "    hmac_key: file-secret\n",
                "  reconnect:\n",
                "    max_delay_secs: 30\n",
                "devices:\n",
                "  - id: lpr-1\n",
                "    host: 10.0.0.5\n",
                "    port: 9000\n",
                "    auth_token: tok123\n",
            )
        )
        .expect("write config");

        let config =
            Config::from_file(file.path().to_str().expect("utf-8 path")).expect("load config");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.fleet.signing.hmac_key, "file-secret");
        assert_eq!(config.fleet.reconnect.max_delay_secs, 30);
        // Untouched sections keep their defaults
        assert_eq!(config.fleet.reconnect.initial_delay_secs, 2);
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].port, 9000);
    }

    #[test]
    fn test_device_config_into_endpoint() {
        let device = DeviceConfig {
            id: "lpr-9".to_string(),
            host: "device.local".to_string(),
            port: 7000,
            auth_token: "tok".to_string(),
        };
        let endpoint: DeviceEndpoint = device.into();
        assert_eq!(endpoint.id.as_str(), "lpr-9");
        assert_eq!(endpoint.address(), "device.local:7000");
    }
}
