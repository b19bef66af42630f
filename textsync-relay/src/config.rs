use serde::Deserialize;
use textsync_collab::server::ServerConfig;

/// Environment variable prefix, e.g. `TEXTSYNC_PORT=9191`.
pub const ENV_PREFIX: &str = "TEXTSYNC_";

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayConfig {
    /// Interface to listen on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted WebSocket message, in bytes
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable error: {0}")]
    Env(#[from] envy::Error),
}

impl RelayConfig {
    /// Load from `TEXTSYNC_*` variables, after merging `.env` if present.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_pairs(std::env::vars())
    }

    /// Parse from explicit key/value pairs (keys carry the prefix).
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter::<_, RelayConfig>(pairs)?)
    }

    /// `host:port` to bind.
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Server settings derived from this configuration.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.server_address(),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_frame_bytes: default_max_frame_bytes(),
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_max_frame_bytes() -> usize {
    ServerConfig::default().max_frame_bytes
}

fn default_log_level() -> String {
    "info".to_string()
}
