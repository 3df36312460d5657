//! BambuLink - Bambu Lab MQTT client with OpenTelemetry tracing
//!
//! A device-facing MQTT client for Bambu Lab printers that wraps every
//! messaging operation in OpenTelemetry spans and ships them to an OTLP
//! collector over HTTP/JSON.
//!
//! # Overview
//!
//! This crate provides:
//! - MQTT v5 transport with cloud TLS and LAN plaintext modes
//! - Report-topic subscription and command publishing
//! - Trace context propagation through MQTT user properties
//! - OTLP/HTTP JSON span export with structured logging
//!
//! # Quick Start
//!
//! ```rust
//! use bambulink::Config;
//!
//! let config = Config::from_lookup(|key| match key {
//!     "DEVICE_TYPE" => Some("X1C".to_string()),
//!     "DEVICE_ID" => Some("01S09A2C0500103".to_string()),
//!     "HOST" => Some("us.mqtt.bambulab.com".to_string()),
//!     "USERNAME" => Some("u_1234567890".to_string()),
//!     "AUTH_TOKEN" => Some("token".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//!
//! assert_eq!(config.device.report_topic(), "device/01S09A2C0500103/report");
//! assert_eq!(config.device.request_topic(), "device/01S09A2C0500103/request");
//! ```

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod observability;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use client::{on_message, BambuClient, DISCONNECT_GRACE};
pub use config::{Config, ConfigError, TelemetrySection, DEFAULT_OTLP_ENDPOINT};
pub use device::{Credentials, DeviceInfo};
pub use error::{ClientError, ClientResult};
pub use telemetry::{Telemetry, TelemetryError};
pub use transport::{InboundMessage, MqttTransport, Transport};
