use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use parley_core::net::protocol::{MAX_MESSAGE_SIZE, TOKEN_TTL_FLOOR_SECS};

use crate::error::ConfigError;

/// Top-level server configuration, loaded from `parley.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL handed out in session links. Blank means "derive one".
    pub public_url: String,
    pub token_ttl_secs: u64,
    /// Redirect `/voice-dev` requests to the hot-reload dev server.
    pub dev_forwarding: bool,
    pub web_root: String,
    pub tls: TlsConfig,
    pub limits: LimitsConfig,
    pub presence: PresenceConfig,
    pub spatial: SpatialConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 24454,
            public_url: String::new(),
            token_ttl_secs: 300,
            dev_forwarding: false,
            web_root: "web".to_string(),
            tls: TlsConfig::default(),
            limits: LimitsConfig::default(),
            presence: PresenceConfig::default(),
            spatial: SpatialConfig::default(),
        }
    }
}

/// Self-signed TLS termination.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// Subject name for the generated certificate.
    pub hostname: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            hostname: "localhost".to_string(),
        }
    }
}

/// Infrastructure limits (body sizes, buffers, bind retry).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_request_bytes: usize,
    pub max_message_bytes: usize,
    /// Outbound frames buffered per peer before it counts as unwritable.
    pub peer_message_buffer: usize,
    pub bind_attempts: u32,
    pub bind_retry_delay_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: MAX_MESSAGE_SIZE,
            max_message_bytes: MAX_MESSAGE_SIZE,
            peer_message_buffer: 256,
            bind_attempts: 5,
            bind_retry_delay_ms: 1000,
        }
    }
}

/// Update rates for the host's presence tick loop. The server only parses
/// and validates these; the embedding host drives [`PresenceSample`] flushes
/// at [`peer_update_interval`](Self::peer_update_interval).
///
/// [`PresenceSample`]: parley_core::presence::PresenceSample
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub peer_update_rate_hz: f32,
    pub audio_effect_update_rate_hz: f32,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            peer_update_rate_hz: 10.0,
            audio_effect_update_rate_hz: 20.0,
        }
    }
}

impl PresenceConfig {
    /// Seconds between periodic peer presence flushes.
    pub fn peer_update_interval(&self) -> f32 {
        1.0 / self.peer_update_rate_hz
    }
}

/// Distance attenuation parameters for the host's audio collaborator.
/// Validated here but not sent over the wire; the bundled web client ships
/// the same defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub min_distance: f64,
    pub max_distance: f64,
    pub rolloff: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            min_distance: 2.0,
            max_distance: 32.0,
            rolloff: 1.0,
        }
    }
}

impl ServerConfig {
    /// Validate configuration. The caller decides whether a failure is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;

        let limits = &self.limits;
        for (name, value) in [
            ("limits.max_request_bytes", limits.max_request_bytes),
            ("limits.max_message_bytes", limits.max_message_bytes),
            ("limits.peer_message_buffer", limits.peer_message_buffer),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if limits.bind_attempts == 0 {
            return Err(ConfigError::Zero("limits.bind_attempts"));
        }

        if self.presence.peer_update_rate_hz <= 0.0 {
            return Err(ConfigError::NonPositive("presence.peer_update_rate_hz"));
        }
        if self.presence.audio_effect_update_rate_hz <= 0.0 {
            return Err(ConfigError::NonPositive(
                "presence.audio_effect_update_rate_hz",
            ));
        }
        if self.spatial.min_distance > self.spatial.max_distance {
            return Err(ConfigError::DistanceRange {
                min: self.spatial.min_distance,
                max: self.spatial.max_distance,
            });
        }

        if self.tls.enabled && self.tls.hostname.trim().is_empty() {
            tracing::warn!("tls.hostname is blank, certificate will be issued for localhost");
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        };
        raw.parse().map_err(|_| ConfigError::BindAddr(raw))
    }

    /// Token lifetime with the minimum applied.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs.max(TOKEN_TTL_FLOOR_SECS))
    }

    pub fn bind_retry_delay(&self) -> Duration {
        Duration::from_millis(self.limits.bind_retry_delay_ms)
    }

    /// Load config from `parley.toml` if it exists, then apply env var overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("parley.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from parley.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse parley.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No parley.toml found, using defaults");
                ServerConfig::default()
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `PARLEY_*` overrides read through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("PARLEY_HOST")
            && !host.is_empty()
        {
            self.host = host;
        }
        if let Some(val) = lookup("PARLEY_PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            self.port = port;
        }
        if let Some(url) = lookup("PARLEY_PUBLIC_URL") {
            self.public_url = url;
        }
        if let Some(val) = lookup("PARLEY_TOKEN_TTL_SECS")
            && let Ok(secs) = val.parse::<u64>()
        {
            self.token_ttl_secs = secs;
        }
        if let Some(val) = lookup("PARLEY_DEV_FORWARDING")
            && let Some(flag) = parse_flag(&val)
        {
            self.dev_forwarding = flag;
        }
        if let Some(root) = lookup("PARLEY_WEB_ROOT")
            && !root.is_empty()
        {
            self.web_root = root;
        }
        if let Some(val) = lookup("PARLEY_TLS")
            && let Some(flag) = parse_flag(&val)
        {
            self.tls.enabled = flag;
        }
        if let Some(hostname) = lookup("PARLEY_TLS_HOSTNAME")
            && !hostname.is_empty()
        {
            self.tls.hostname = hostname;
        }
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
