//! Error taxonomy shared across the gateway.

use thiserror::Error;

use crate::config::ConfigError;
use crate::credentials::CredentialError;

/// Top-level gateway error.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The credential store could not be written.
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    /// The presented credentials did not verify.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// A peer sent something that does not parse as expected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The proxy could not reach its upstream.
    #[error("failed to connect upstream {addr}: {source}")]
    UpstreamConnect {
        addr: String,
        source: std::io::Error,
    },

    /// Any other I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn upstream_connect(addr: impl Into<String>, source: std::io::Error) -> Self {
        Self::UpstreamConnect {
            addr: addr.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
