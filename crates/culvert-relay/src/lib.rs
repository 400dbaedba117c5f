//! Relay engine: session pool, active-session selection, and forwarding
//!
//! Agents dial in over QUIC and register themselves in a [`SessionPool`];
//! a [`Selector`] binds one of them as the active session, consulting an
//! operator [`SessionPicker`] when there is a choice to make. The
//! [`ForwardListener`] accepts plain TCP connections and relays each one,
//! as an independent logical stream, through whichever session is bound
//! at that moment. Failover is eviction plus reselection, driven by the
//! session's closure signal and backed up by a per-connection re-check.

pub mod agent_listener;
pub mod console;
pub mod forward;
pub mod pool;
pub mod relay;
pub mod select;

pub use agent_listener::AgentListener;
pub use console::{Command, ConsolePicker};
pub use forward::ForwardListener;
pub use pool::SessionPool;
pub use relay::relay;
pub use select::{PickError, Selector, SessionPicker};

use thiserror::Error;

/// Relay-engine errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Session error: {0}")]
    Session(#[from] culvert_session::SessionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for relay-engine operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Wire identifiers are zero-padded to a fixed size; trim for display
pub fn display_id(id: &str) -> &str {
    id.trim_end_matches('\0')
}
