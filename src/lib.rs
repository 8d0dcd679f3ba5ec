//! MQTT Telemetry - MQTT 3.1.1 client session manager
//!
//! A publish/subscribe client that owns its transport, frames and parses MQTT
//! control packets, tracks QoS 1 acknowledgements and keepalive, and exposes a
//! thread-safe API driven by a background pump.
//!
//! # Overview
//!
//! - [`protocol`]: packet types, the wire codec and topic rules
//! - [`transport`]: the non-blocking [`Transport`] trait and [`TcpTransport`]
//! - [`session`]: the single-threaded state machine
//! - [`client`]: the cloneable, lock-protected facade
//! - [`pump`]: a tokio task calling `sync()` on an interval
//!
//! # Quick Start
//!
//! ```no_run
//! use mqtt_telemetry::{Client, ConnectOptions, Pump, QoS, SessionSettings};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), mqtt_telemetry::ClientError> {
//! let client = Client::new(SessionSettings::default());
//! client.connect_tcp("localhost", 1883, ConnectOptions::new("gateway-1"))?;
//!
//! let pump = Pump::spawn(client.clone(), Duration::from_millis(100));
//! client.wait_connected().await?;
//!
//! client.set_message_handler(|message: &mqtt_telemetry::ReceivedMessage| {
//!     println!("{}: {}", message.topic_lossy(), message.payload_lossy());
//! })?;
//! client.subscribe("v1/devices/me/rpc/request/+", QoS::AtMostOnce)?;
//! client.publish("v1/gateway/telemetry", r#"{"device1":[{"test1":123}]}"#, QoS::AtLeastOnce)?;
//!
//! pump.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod pump;
pub mod session;
pub mod testing;
pub mod transport;

pub use client::Client;
pub use clock::{Clock, SystemClock};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ClientResult};
pub use observability::MetricsSnapshot;
pub use protocol::{topic_matches, QoS};
pub use pump::{Pump, PumpHandle, DEFAULT_PUMP_INTERVAL};
pub use session::{
    ConnectOptions, ConnectionState, DisconnectReason, EventHandler, MessageHandler,
    ReceivedMessage, SessionEvent, SessionSettings,
};
pub use transport::{TcpTransport, Transport, TransportError};
