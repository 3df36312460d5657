//! Device identity and broker credentials
//!
//! Pure value types built once from configuration at startup and never
//! mutated afterwards. `Credentials` carries secrets, so its `Debug`
//! output redacts them.

use std::fmt;

/// Identity of the printer this process talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Printer model family, e.g. `X1C`.
    pub device_type: String,
    /// Device serial used in topic addressing.
    pub id: String,
}

impl DeviceInfo {
    pub fn new(device_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            id: id.into(),
        }
    }

    /// Topic the device publishes status reports on: `device/{id}/report`
    pub fn report_topic(&self) -> String {
        format!("device/{}/report", self.id)
    }

    /// Topic the device accepts commands on: `device/{id}/request`
    pub fn request_topic(&self) -> String {
        format!("device/{}/request", self.id)
    }
}

/// Broker endpoint and authentication material.
#[derive(Clone)]
pub struct Credentials {
    /// Broker address. Either a full `mqtt(s)://` URL or a bare hostname.
    pub host: String,
    /// Port override. When absent the scheme default applies.
    pub port: Option<u16>,
    pub username: String,
    pub auth_token: String,
    /// LAN access code. Carried for parity with the device API; not used
    /// by the connect handshake.
    pub access_code: Option<String>,
    /// Selects plaintext scheme/port defaults for a LAN broker.
    pub local_mqtt: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("auth_token", &"***")
            .field("access_code", &self.access_code.as_ref().map(|_| "***"))
            .field("local_mqtt", &self.local_mqtt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_construction() {
        let device = DeviceInfo::new("X1C", "01S09A2C0500103");
        assert_eq!(device.report_topic(), "device/01S09A2C0500103/report");
        assert_eq!(device.request_topic(), "device/01S09A2C0500103/request");
    }

    #[test]
    fn test_device_info_fields() {
        let device = DeviceInfo::new("P1S", "DEV-42");
        assert_eq!(device.device_type, "P1S");
        assert_eq!(device.id, "DEV-42");
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let credentials = Credentials {
            host: "us.mqtt.bambulab.com".to_string(),
            port: None,
            username: "u_123".to_string(),
            auth_token: "super-secret-token".to_string(),
            access_code: Some("12345678".to_string()),
            local_mqtt: false,
        };

        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("super-secret-token"));
        assert!(!rendered.contains("12345678"));
        assert!(rendered.contains("us.mqtt.bambulab.com"));
        assert!(rendered.contains("u_123"));
    }

    #[test]
    fn test_credentials_debug_shows_absent_access_code() {
        let credentials = Credentials {
            host: "localhost".to_string(),
            port: Some(1883),
            username: "bblp".to_string(),
            auth_token: "token".to_string(),
            access_code: None,
            local_mqtt: true,
        };

        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("access_code: None"));
    }
}
