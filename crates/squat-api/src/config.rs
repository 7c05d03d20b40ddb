//! API server configuration.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use squat_session::SessionConfig;

const ENV_PREFIX: &str = "SQUAT";
const ENV_SEPARATOR: &str = "__";

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// HTTP server configuration
    pub http: HttpConfig,

    /// Per-session behaviour
    pub session: SessionSettings,

    /// Rep-event broadcast
    pub events: EventsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_addr: SocketAddr,

    /// Largest accepted frame message or upload body (bytes)
    pub max_frame_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            max_frame_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// How long a live client gets to name a difficulty
    pub difficulty_wait_ms: u64,

    /// Mirror live frames (webcam selfie view)
    pub mirror: bool,

    pub show_angles: bool,

    pub jpeg_quality: u8,

    /// Frames buffered per session before new ones are dropped
    pub frame_queue: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            difficulty_wait_ms: 3000,
            mirror: true,
            show_angles: false,
            jpeg_quality: 80,
            frame_queue: 4,
        }
    }
}

impl SessionSettings {
    pub fn difficulty_wait(&self) -> Duration {
        Duration::from_millis(self.difficulty_wait_ms)
    }

    /// Settings for a live feed session
    pub fn live(&self) -> SessionConfig {
        SessionConfig {
            mirror: self.mirror,
            show_angles: self.show_angles,
        }
    }

    /// Settings for a single uploaded frame, which is never mirrored
    pub fn upload(&self) -> SessionConfig {
        SessionConfig {
            mirror: false,
            show_angles: self.show_angles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Rep events buffered per slow subscriber
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
}

impl ApiConfig {
    /// Load configuration from file, with environment overrides
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(environment())
            .build()?;

        settings.try_deserialize()
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(environment())
            .build()?;

        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.http.bind_addr.port(), 8000);
        assert_eq!(config.session.difficulty_wait(), Duration::from_secs(3));
        assert!(config.session.live().mirror);
        assert!(!config.session.upload().mirror);
        assert_eq!(config.events.capacity, 256);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                "[http]\nbind_addr = \"127.0.0.1:9100\"\n\n[session]\nshow_angles = true\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let config: ApiConfig = settings.try_deserialize().unwrap();

        assert_eq!(config.http.bind_addr, "127.0.0.1:9100".parse().unwrap());
        assert_eq!(config.http.max_frame_bytes, HttpConfig::default().max_frame_bytes);
        assert!(config.session.show_angles);
        assert_eq!(config.session.frame_queue, 4);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("SQUAT__EVENTS__CAPACITY", "32");
        let config = ApiConfig::from_env().unwrap();
        std::env::remove_var("SQUAT__EVENTS__CAPACITY");

        assert_eq!(config.events.capacity, 32);
        assert_eq!(config.session, SessionSettings::default());
    }
}
