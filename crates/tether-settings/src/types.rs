//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may specify any subset of fields.

use serde::{Deserialize, Serialize};

/// Secret used when nothing else is configured. Fine for local testing only.
pub const DEFAULT_JWT_SECRET: &str = "secret";

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Network and connection-core settings.
    pub server: ServerSettings,
    /// Websocket authentication settings.
    pub auth: AuthSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Voice chat worker settings.
    pub chat: ChatSettings,
}

/// Server network and connection-core settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum inbound websocket message size in bytes.
    pub max_message_size: usize,
    /// Pending jobs allowed per connection before the read loop waits.
    /// `0` means unbounded.
    pub queue_capacity: usize,
    /// How long graceful shutdown waits for connections to drain.
    pub shutdown_timeout_ms: u64,
    /// Interval between events on the demo push stream.
    pub tick_interval_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8013,
            max_message_size: 16 * 1024 * 1024,
            queue_capacity: 256,
            shutdown_timeout_ms: 30_000,
            tick_interval_ms: 1_000,
        }
    }
}

/// Websocket authentication settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HS256 secret used to verify bearer tokens.
    pub jwt_secret: String,
}

impl AuthSettings {
    /// Whether the compiled-in development secret is still in use.
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
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

/// Voice chat worker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Silence after the last audio chunk that closes an utterance.
    pub utterance_gap_ms: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            utterance_gap_ms: 800,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_server() {
        let s = ServerSettings::default();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 8013);
        assert_eq!(s.queue_capacity, 256);
        assert_eq!(s.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn default_secret_is_flagged() {
        assert!(AuthSettings::default().uses_default_secret());
        let custom = AuthSettings {
            jwt_secret: "hunter2".into(),
        };
        assert!(!custom.uses_default_secret());
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(TetherSettings::default()).unwrap();
        assert!(json["server"]["queueCapacity"].is_number());
        assert!(json["server"]["maxMessageSize"].is_number());
        assert!(json["auth"]["jwtSecret"].is_string());
        assert!(json["chat"]["utteranceGapMs"].is_number());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: TetherSettings =
            serde_json::from_str(r#"{"server":{"port":9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.logging.level, "info");
    }
}
