//! Server error types.

use thiserror::Error;

/// Invalid configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A value is out of range or inconsistent with another.
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Errors starting or running the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Could not bind the listen address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Bound, but the local address could not be read back.
    #[error("failed to read local address: {0}")]
    LocalAddr(#[source] std::io::Error),
    /// Configuration rejected by validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Metrics recorder could not be installed.
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_display_includes_addr() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:8080".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("0.0.0.0:8080"));
        assert!(msg.contains("in use"));
    }

    #[test]
    fn config_error_converts_transparently() {
        let err: ServerError = ConfigError::InvalidValue("port".into()).into();
        assert_eq!(err.to_string(), "invalid config value: port");
    }
}
