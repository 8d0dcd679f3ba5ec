//! Configuration for the MQTT telemetry client
//!
//! A TOML file with three sections: `[broker]` (where and how to connect),
//! `[session]` (retry and buffer limits) and `[telemetry]` (what the
//! `mqtt-telemetry` binary publishes and subscribes to). Credentials are never
//! stored in the file; it names environment variables that are read when the
//! connection is made.

use crate::protocol::{validate_topic_filter, validate_topic_name, LastWill, QoS};
use crate::pump::DEFAULT_PUMP_INTERVAL;
use crate::session::{ConnectOptions, SessionSettings};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Main client configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ClientConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host[:port]`
    pub url: String,
    /// Client identifier; generated when absent or empty
    #[serde(default)]
    pub client_id: Option<String>,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Keepalive interval in seconds (0 disables)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Last will published by the broker if this client vanishes
    #[serde(default)]
    pub will: Option<WillSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WillSection {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

/// Session section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    #[serde(default = "default_send_buffer_size")]
    pub send_buffer_size: usize,
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    #[serde(default = "default_pump_interval_ms")]
    pub pump_interval_ms: u64,
}

/// Telemetry section, used by the binary only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    #[serde(default = "default_publish_topic")]
    pub publish_topic: String,
    #[serde(default = "default_subscribe_topic")]
    pub subscribe_topic: Option<String>,
    #[serde(default = "default_payload")]
    pub payload: String,
    #[serde(default = "default_publish_interval")]
    pub publish_interval_secs: u64,
    #[serde(default)]
    pub qos: u8,
}

fn default_keep_alive() -> u16 {
    400
}

fn default_clean_session() -> bool {
    true
}

fn default_retry_timeout_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_inflight() -> usize {
    64
}

fn default_send_buffer_size() -> usize {
    64 * 1024
}

fn default_max_packet_size() -> usize {
    256 * 1024
}

fn default_pump_interval_ms() -> u64 {
    DEFAULT_PUMP_INTERVAL.as_millis() as u64
}

fn default_publish_topic() -> String {
    "v1/gateway/telemetry".to_string()
}

fn default_subscribe_topic() -> Option<String> {
    Some("v1/devices/me/rpc/request/+".to_string())
}

fn default_payload() -> String {
    r#"{"device1":[{"test1":123}]}"#.to_string()
}

fn default_publish_interval() -> u64 {
    2
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: format!("mqtt://localhost:{DEFAULT_MQTT_PORT}"),
            client_id: None,
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            clean_session: default_clean_session(),
            will: None,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            retry_timeout_ms: default_retry_timeout_ms(),
            max_attempts: default_max_attempts(),
            max_inflight: default_max_inflight(),
            send_buffer_size: default_send_buffer_size(),
            max_packet_size: default_max_packet_size(),
            pump_interval_ms: default_pump_interval_ms(),
        }
    }
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            publish_topic: default_publish_topic(),
            subscribe_topic: default_subscribe_topic(),
            payload: default_payload(),
            publish_interval_secs: default_publish_interval(),
            qos: 0,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_address()?;

        if let Some(client_id) = &self.broker.client_id {
            if client_id.is_empty() && !self.broker.clean_session {
                return Err(ConfigError::InvalidConfig(
                    "an empty client_id requires clean_session = true".to_string(),
                ));
            }
        }
        if let Some(will) = &self.broker.will {
            validate_topic_name(&will.topic)
                .map_err(|e| ConfigError::InvalidConfig(format!("broker.will.topic: {e}")))?;
            qos_from_config("broker.will.qos", will.qos)?;
        }

        let session = &self.session;
        if session.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.max_attempts must be at least 1".to_string(),
            ));
        }
        if session.retry_timeout_ms == 0 || session.pump_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "session.retry_timeout_ms and session.pump_interval_ms must be positive"
                    .to_string(),
            ));
        }
        if session.max_inflight == 0 || session.max_inflight > u16::MAX as usize {
            return Err(ConfigError::InvalidConfig(format!(
                "session.max_inflight must be between 1 and {}",
                u16::MAX
            )));
        }
        if session.send_buffer_size == 0 || session.max_packet_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "session buffer sizes must be positive".to_string(),
            ));
        }

        let telemetry = &self.telemetry;
        validate_topic_name(&telemetry.publish_topic)
            .map_err(|e| ConfigError::InvalidConfig(format!("telemetry.publish_topic: {e}")))?;
        if let Some(filter) = &telemetry.subscribe_topic {
            validate_topic_filter(filter).map_err(|e| {
                ConfigError::InvalidConfig(format!("telemetry.subscribe_topic: {e}"))
            })?;
        }
        if telemetry.publish_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "telemetry.publish_interval_secs must be positive".to_string(),
            ));
        }
        qos_from_config("telemetry.qos", telemetry.qos)?;

        Ok(())
    }

    /// Host and port from the broker URL
    ///
    /// Only plain `mqtt://` (or `tcp://`) is accepted; TLS is not provided
    /// by this client.
    pub fn broker_address(&self) -> Result<(String, u16), ConfigError> {
        let url = Url::parse(&self.broker.url)
            .map_err(|e| ConfigError::InvalidBrokerUrl(format!("{}: {e}", self.broker.url)))?;

        match url.scheme() {
            "mqtt" | "tcp" => {}
            other => {
                return Err(ConfigError::InvalidBrokerUrl(format!(
                    "unsupported scheme '{other}' in {}",
                    self.broker.url
                )))
            }
        }

        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(self.broker.url.clone()))?;
        let port = url.port().unwrap_or(DEFAULT_MQTT_PORT);
        Ok((host.to_string(), port))
    }

    /// Configured client identifier, or a fresh random one
    pub fn client_id(&self) -> String {
        match self.broker.client_id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("mqtt-telemetry-{}", Uuid::new_v4().simple()),
        }
    }

    /// Helper method to get environment variable with consistent error handling
    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.broker.password_env.as_ref())
    }

    /// CONNECT options with credentials resolved from the environment
    ///
    /// A configured `username_env` that is not set is an error; a missing
    /// password is not.
    pub fn connect_options(&self) -> Result<ConnectOptions, ConfigError> {
        let mut options = ConnectOptions::new(self.client_id())
            .with_keep_alive(self.broker.keep_alive_secs)
            .with_clean_session(self.broker.clean_session);

        if let Some(username_env) = &self.broker.username_env {
            let username = self
                .get_mqtt_username()
                .ok_or_else(|| ConfigError::EnvVarNotFound(username_env.clone()))?;
            options = options.with_credentials(username, self.get_mqtt_password());
        }

        if let Some(will) = &self.broker.will {
            options = options.with_will(LastWill {
                topic: will.topic.clone(),
                payload: Bytes::from(will.payload.clone()),
                qos: qos_from_config("broker.will.qos", will.qos)?,
                retain: will.retain,
            });
        }

        Ok(options)
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            retry_timeout: Duration::from_millis(self.session.retry_timeout_ms),
            max_attempts: self.session.max_attempts,
            max_inflight: self.session.max_inflight,
            send_buffer_size: self.session.send_buffer_size,
            max_packet_size: self.session.max_packet_size,
        }
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.session.pump_interval_ms)
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry.publish_interval_secs)
    }

    pub fn telemetry_qos(&self) -> Result<QoS, ConfigError> {
        qos_from_config("telemetry.qos", self.telemetry.qos)
    }
}

/// QoS 0 and 1 only; QoS 2 is not supported by the session
fn qos_from_config(field: &str, value: u8) -> Result<QoS, ConfigError> {
    match value {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        other => Err(ConfigError::InvalidConfig(format!(
            "{field} must be 0 or 1, got {other}"
        ))),
    }
}
