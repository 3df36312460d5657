//! Pure connection state management for the MQTT session
//!
//! This module contains pure functions for connection state handling,
//! broker address resolution, and session configuration.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use thiserror::Error;
use url::Url;

use crate::device::{Credentials, DeviceInfo};

/// Connection state for the MQTT session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - session not yet acknowledged by the broker
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
}

/// MQTT session errors
#[derive(Error, Debug)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Broker refused the connection: {0}")]
    ConnectionRefused(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Session already started")]
    AlreadyStarted,

    #[error("MQTT disconnect failed: {0}")]
    DisconnectFailed(String),
}

/// Subscription acknowledgement observed on the session event stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeAck {
    /// Acknowledgements seen since the session started
    pub count: u64,
    /// Rejection reason from the latest acknowledgement, if any
    pub rejected: Option<String>,
}

/// QoS applied to every subscription and publish. Delivery is
/// fire-and-forget.
pub const DELIVERY_QOS: QoS = QoS::AtMostOnce;

/// Publishes are never retained by the broker
pub const PUBLISH_RETAIN: bool = false;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const MAX_PACKET_SIZE: u32 = 256 * 1024;
const TLS_PORT: u16 = 8883;
const PLAIN_PORT: u16 = 1883;

/// Resolved broker endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Resolve the broker address from credentials (pure function)
///
/// `host` may be a bare hostname or a full `mqtt://` / `mqtts://` URL.
/// Bare hostnames default to TLS unless the deployment targets a LAN
/// broker. An explicit port on the credentials wins over one embedded in
/// the URL.
pub fn parse_broker_address(credentials: &Credentials) -> Result<BrokerAddress, MqttError> {
    let raw = credentials.host.trim();
    if raw.is_empty() {
        return Err(MqttError::InvalidBrokerUrl("Missing host".to_string()));
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else if credentials.local_mqtt {
        format!("mqtt://{raw}")
    } else {
        format!("mqtts://{raw}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|e| MqttError::InvalidBrokerUrl(format!("Invalid URL: {e}")))?;

    let use_tls = match url.scheme() {
        "mqtts" => true,
        "mqtt" => false,
        other => {
            return Err(MqttError::InvalidBrokerUrl(format!(
                "Unsupported scheme: {other}"
            )))
        }
    };

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => return Err(MqttError::InvalidBrokerUrl("Missing host".to_string())),
    };
    let default_port = if use_tls { TLS_PORT } else { PLAIN_PORT };
    let port = credentials.port.or(url.port()).unwrap_or(default_port);

    Ok(BrokerAddress { host, port, use_tls })
}

/// Session client id: stable device prefix plus a millisecond suffix so a
/// restarted process never collides with its previous session on the
/// broker.
pub fn unique_client_id(device_id: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    format!("bambulink-{device_id}-{timestamp}")
}

/// Configure MQTT session options from device identity and credentials
pub fn configure_mqtt_options(
    device: &DeviceInfo,
    credentials: &Credentials,
) -> Result<MqttOptions, MqttError> {
    let address = parse_broker_address(credentials)?;

    let mut mqtt_options =
        MqttOptions::new(unique_client_id(&device.id), address.host, address.port);

    if address.use_tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    mqtt_options.set_credentials(&credentials.username, &credentials.auth_token);
    mqtt_options.set_keep_alive(KEEP_ALIVE);

    // Full printer state dumps exceed the rumqttc default packet limit
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(mqtt_options)
}
