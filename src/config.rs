//! Environment-driven configuration
//!
//! The process reads only environment variables; there are no CLI flags
//! and no configuration files. Loading goes through a lookup closure so
//! tests can supply variables without touching the process environment.

use thiserror::Error;

use crate::device::{Credentials, DeviceInfo};

/// Default OTLP collector base URL when no endpoint is configured.
pub const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid device id '{0}': expected alphanumerics plus '.', '_', '-'")]
    InvalidDeviceId(String),
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
}

/// Trace collector settings.
#[derive(Debug, Clone)]
pub struct TelemetrySection {
    /// Base URL of the OTLP collector, without the `/v1/traces` suffix.
    pub endpoint: String,
}

/// Full process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub device: DeviceInfo,
    pub credentials: Credentials,
    pub telemetry: TelemetrySection,
}

impl Config {
    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device_type = require(&lookup, "DEVICE_TYPE")?;
        let device_id = require(&lookup, "DEVICE_ID")?;
        validate_device_id(&device_id)?;

        let host = require(&lookup, "HOST")?;
        let username = require(&lookup, "USERNAME")?;
        let auth_token = require(&lookup, "AUTH_TOKEN")?;
        let access_code = lookup("ACCESS_CODE").filter(|value| !value.trim().is_empty());
        let port = parse_port(lookup("PORT"))?;
        let local_mqtt = parse_flag(lookup("LOCAL_MQTT"));

        let endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OTLP_ENDPOINT.to_string());

        Ok(Self {
            device: DeviceInfo::new(device_type, device_id),
            credentials: Credentials {
                host,
                port,
                username,
                auth_token,
                access_code,
                local_mqtt,
            },
            telemetry: TelemetrySection { endpoint },
        })
    }
}

fn require<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::EnvVarNotFound(key.to_string()))
}

fn parse_port(raw: Option<String>) -> Result<Option<u16>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(value) => match value.trim().parse::<u16>() {
            Ok(port) => Ok(Some(port)),
            Err(_) => Err(ConfigError::InvalidValue {
                key: "PORT".to_string(),
                value,
            }),
        },
    }
}

fn parse_flag(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(str::trim),
        Some("true") | Some("1") | Some("yes")
    )
}

/// Device ids are interpolated into topics, so only topic-safe characters
/// are accepted.
fn validate_device_id(id: &str) -> Result<(), ConfigError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidDeviceId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_vars() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DEVICE_TYPE", "X1C"),
            ("DEVICE_ID", "01S09A2C0500103"),
            ("HOST", "us.mqtt.bambulab.com"),
            ("USERNAME", "u_123"),
            ("AUTH_TOKEN", "token-abc"),
        ])
    }

    fn load(vars: &HashMap<&str, &str>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| vars.get(key).map(|value| value.to_string()))
    }

    #[test]
    fn test_loads_required_values() {
        let config = load(&base_vars()).expect("config should load");
        assert_eq!(config.device.device_type, "X1C");
        assert_eq!(config.device.id, "01S09A2C0500103");
        assert_eq!(config.credentials.host, "us.mqtt.bambulab.com");
        assert_eq!(config.credentials.username, "u_123");
        assert_eq!(config.credentials.auth_token, "token-abc");
        assert_eq!(config.credentials.access_code, None);
        assert_eq!(config.credentials.port, None);
        assert!(!config.credentials.local_mqtt);
    }

    #[test]
    fn test_missing_required_key_names_variable() {
        let mut vars = base_vars();
        vars.remove("AUTH_TOKEN");
        let err = load(&vars).expect_err("missing variable should fail");
        assert!(matches!(err, ConfigError::EnvVarNotFound(ref key) if key == "AUTH_TOKEN"));
    }

    #[test]
    fn test_empty_required_value_is_missing() {
        let mut vars = base_vars();
        vars.insert("HOST", "   ");
        let err = load(&vars).expect_err("blank variable should fail");
        assert!(matches!(err, ConfigError::EnvVarNotFound(ref key) if key == "HOST"));
    }

    #[test]
    fn test_optional_values() {
        let mut vars = base_vars();
        vars.insert("ACCESS_CODE", "12345678");
        vars.insert("PORT", "8883");
        vars.insert("LOCAL_MQTT", "true");
        vars.insert("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4318");

        let config = load(&vars).expect("config should load");
        assert_eq!(config.credentials.access_code.as_deref(), Some("12345678"));
        assert_eq!(config.credentials.port, Some(8883));
        assert!(config.credentials.local_mqtt);
        assert_eq!(config.telemetry.endpoint, "http://collector:4318");
    }

    #[test]
    fn test_endpoint_defaults() {
        let config = load(&base_vars()).expect("config should load");
        assert_eq!(config.telemetry.endpoint, DEFAULT_OTLP_ENDPOINT);
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut vars = base_vars();
        vars.insert("PORT", "not-a-port");
        let err = load(&vars).expect_err("bad port should fail");
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PORT"));
    }

    #[test]
    fn test_local_mqtt_flag_parsing() {
        assert!(parse_flag(Some("true".to_string())));
        assert!(parse_flag(Some("1".to_string())));
        assert!(parse_flag(Some("yes".to_string())));
        assert!(parse_flag(Some(" true ".to_string())));
        assert!(!parse_flag(Some("false".to_string())));
        assert!(!parse_flag(Some("0".to_string())));
        assert!(!parse_flag(None));
    }

    #[test]
    fn test_device_id_validation() {
        assert!(validate_device_id("01S09A2C0500103").is_ok());
        assert!(validate_device_id("dev_01.a-b").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("has/slash").is_err());
        assert!(validate_device_id("has+plus").is_err());
        assert!(validate_device_id("has#hash").is_err());
        assert!(validate_device_id("has space").is_err());
    }

    #[test]
    fn test_invalid_device_id_rejected_at_load() {
        let mut vars = base_vars();
        vars.insert("DEVICE_ID", "bad/id");
        let err = load(&vars).expect_err("bad device id should fail");
        assert!(matches!(err, ConfigError::InvalidDeviceId(_)));
    }
}
