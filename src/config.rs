use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::session::SessionConfig;
use crate::transport::ReconnectPolicy;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint for the live audio stream
    pub stream_url: String,
    /// REST root for meeting history
    pub api_url: String,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    /// Chunks buffered before one outbound frame
    pub batch_size: usize,
    /// Duration of one captured chunk in milliseconds
    pub chunk_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                stream_url: "ws://127.0.0.1:8080/ws/audio-stream".to_string(),
                api_url: "http://127.0.0.1:8080/api".to_string(),
            },
            audio: AudioConfig {
                batch_size: 3,
                chunk_ms: 1000,
            },
            reconnect: ReconnectConfig {
                max_attempts: 5,
                retry_delay_ms: 3000,
            },
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load from `path`, falling back to defaults when the file is absent
    /// or unreadable.
    pub fn load_or_default(path: &str) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("No config at {path} ({e}), using defaults");
                Self::default()
            }
        }
    }

    /// The session-engine view of this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.server.stream_url.clone(),
            batch_size: self.audio.batch_size,
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect.max_attempts,
                retry_delay: Duration::from_millis(self.reconnect.retry_delay_ms),
            },
            ..SessionConfig::default()
        }
    }
}
