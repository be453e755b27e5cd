use std::net::SocketAddr;

/// Failures that stop the listening server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr} after {attempts} attempt(s): {source}")]
    Bind {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("server task ended unexpectedly: {0}")]
    Task(String),
}

impl From<rustls::Error> for ServerError {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}

impl From<rcgen::Error> for ServerError {
    fn from(e: rcgen::Error) -> Self {
        Self::Tls(e.to_string())
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not a valid socket address")]
    BindAddr(String),
    #[error("{0} must be > 0")]
    Zero(&'static str),
    #[error("{0} must be a positive number")]
    NonPositive(&'static str),
    #[error("spatial.min_distance ({min}) exceeds spatial.max_distance ({max})")]
    DistanceRange { min: f64, max: f64 },
}
