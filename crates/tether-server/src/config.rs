//! Server configuration.

use std::time::Duration;

use tether_settings::TetherSettings;
use tether_ws::QueueCapacity;

/// Configuration for the Tether server, resolved from [`TetherSettings`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection inbound queue bound.
    pub queue: QueueCapacity,
    /// How long shutdown waits for connections to drain.
    pub shutdown_timeout: Duration,
    /// Interval between events on `/ticks`.
    pub tick_interval: Duration,
    /// Silence that closes a voice chat utterance.
    pub utterance_gap: Duration,
    /// HS256 secret for bearer tokens.
    pub jwt_secret: String,
}

impl ServerConfig {
    /// Resolve from loaded settings.
    pub fn from_settings(settings: &TetherSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_size,
            queue: QueueCapacity::from_setting(settings.server.queue_capacity),
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
            tick_interval: Duration::from_millis(settings.server.tick_interval_ms),
            utterance_gap: Duration::from_millis(settings.chat.utterance_gap_ms),
            jwt_secret: settings.auth.jwt_secret.clone(),
        }
    }

    /// `host:port` bind string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut config = Self::from_settings(&TetherSettings::default());
        config.host = "127.0.0.1".into();
        config.port = 0;
        config
    }
}
