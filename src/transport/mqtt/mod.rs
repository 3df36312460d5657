//! MQTT v5 transport implementation
//!
//! This module provides a focused, decomposed MQTT session that separates
//! pure functions from I/O operations for better testability.
//!
//! # Architecture
//!
//! The module is split into three focused sub-modules:
//!
//! - [`connection`] - Pure connection state management and configuration
//! - [`message_handler`] - Pure event routing and message forwarding
//! - [`client`] - Impure I/O operations and session coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use bambulink::transport::mqtt::MqttConnection;
//! use bambulink::{Credentials, DeviceInfo};
//!
//! # tokio_test::block_on(async {
//! let device = DeviceInfo::new("X1C", "01S09A2C0500103");
//! let credentials = Credentials {
//!     host: "mqtts://us.mqtt.bambulab.com".to_string(),
//!     port: None,
//!     username: "u_1234567890".to_string(),
//!     auth_token: "token".to_string(),
//!     access_code: None,
//!     local_mqtt: false,
//! };
//!
//! let mut connection = MqttConnection::new(&device, &credentials)?;
//! connection.connect().await?;
//! connection.subscribe(&device.report_topic()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

// Re-export public types for convenience
pub use client::MqttConnection;
pub use connection::{ConnectionState, MqttError, SubscribeAck};
pub use message_handler::{EventRoute, MessageForwarder};
