//! QUIC-backed agent sessions for the culvert relay
//!
//! One QUIC connection is one agent session: the encrypted transport and the
//! stream multiplexer come from quinn, so a session can host many independent
//! logical streams while the connection-level keep-alive detects dead agents
//! without any application-level pinging.
//!
//! The relay side binds a [`SessionListener`] with a certificate/key pair and
//! accepts [`Session`]s; the agent side dials out through a
//! [`SessionConnector`]. Certificate material is loaded from PEM files or
//! generated on the fly (see [`cert`]).

// Initialize rustls crypto provider once globally
// This MUST be called before any rustls/QUIC operations
static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            // Provider already installed by another crate, this is fine
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

pub mod cert;
pub mod config;
pub mod listener;
pub mod session;

pub use config::SessionConfig;
pub use listener::{SessionConnector, SessionListener};
pub use session::{Session, SessionStream};

/// Size of the identifier payload an agent writes on its first stream
///
/// The identifier is sent raw, without a length prefix or delimiter: the
/// relay reads once into a buffer of exactly this size and takes whatever
/// landed there, trailing zero bytes included. Identifiers longer than
/// this are truncated on the wire.
pub const IDENTIFIER_LEN: usize = 255;

use thiserror::Error;

/// Session-transport errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Result type for session-transport operations
pub type SessionResult<T> = Result<T, SessionError>;
