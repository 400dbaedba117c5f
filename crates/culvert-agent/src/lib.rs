//! Culvert agent library
//!
//! The agent dials out to a relay, identifies itself on a single logical
//! stream, then serves the streams the relay opens back: each one is
//! forwarded to the configured target address as a plain TCP connection.

pub mod agent;
pub mod forwarder;

pub use agent::{Agent, AgentConfig};

use thiserror::Error;

/// Agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Session error: {0}")]
    Session(#[from] culvert_session::SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not resolve relay address '{0}'")]
    Resolve(String),
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
