//! Session listener (relay side) and connector (agent side)

use quinn::Endpoint;
use std::net::SocketAddr;
use tracing::{debug, error, info};

use crate::config::SessionConfig;
use crate::session::Session;
use crate::{ensure_crypto_provider, SessionError, SessionResult};

/// Listens for agents dialing in
#[derive(Debug)]
pub struct SessionListener {
    endpoint: Endpoint,
}

impl SessionListener {
    /// Bind the encrypted listener
    ///
    /// Fails on unusable certificate material or an unbindable address;
    /// both are startup-fatal for the caller.
    pub fn bind(bind_addr: SocketAddr, config: &SessionConfig) -> SessionResult<Self> {
        ensure_crypto_provider();
        config.validate()?;

        let server_config = config.build_server_config()?;

        let endpoint =
            Endpoint::server(server_config, bind_addr).map_err(SessionError::IoError)?;

        let local_addr = endpoint.local_addr().map_err(SessionError::IoError)?;

        info!("Session listener bound to {}", local_addr);

        Ok(Self { endpoint })
    }

    /// Accept the next agent session
    ///
    /// A handshake failure on one incoming attempt is logged and skipped;
    /// an error return means the endpoint itself is unusable.
    pub async fn accept(&self) -> SessionResult<Session> {
        loop {
            match self.endpoint.accept().await {
                Some(connecting) => {
                    let remote = connecting.remote_address();

                    debug!("Incoming connection from {}", remote);

                    match connecting.await {
                        Ok(connection) => {
                            return Ok(Session::new(connection));
                        }
                        Err(e) => {
                            error!("Failed to establish session from {}: {}", remote, e);
                            // Continue to accept next connection
                            continue;
                        }
                    }
                }
                None => {
                    // Endpoint is closed
                    return Err(SessionError::ConnectionError(
                        "listener endpoint closed".to_string(),
                    ));
                }
            }
        }
    }

    pub fn local_addr(&self) -> SessionResult<SocketAddr> {
        self.endpoint.local_addr().map_err(SessionError::IoError)
    }

    /// Stop accepting; pending and future `accept` calls fail
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"listener closed");
        info!("Session listener closed");
    }
}

/// Establishes outgoing sessions to a relay
#[derive(Debug)]
pub struct SessionConnector {
    endpoint: Endpoint,
}

impl SessionConnector {
    pub fn new(config: &SessionConfig) -> SessionResult<Self> {
        ensure_crypto_provider();
        config.validate()?;

        let client_config = config.build_client_config()?;

        let mut endpoint =
            Endpoint::client("0.0.0.0:0".parse().unwrap()).map_err(SessionError::IoError)?;

        endpoint.set_default_client_config(client_config);

        debug!("Session connector created");

        Ok(Self { endpoint })
    }

    pub async fn connect(&self, addr: SocketAddr, server_name: &str) -> SessionResult<Session> {
        debug!("Connecting to relay: {} ({})", server_name, addr);

        let connecting = self
            .endpoint
            .connect(addr, server_name)
            .map_err(|e| SessionError::ConnectionError(e.to_string()))?;

        let connection = connecting
            .await
            .map_err(|e| SessionError::ConnectionError(e.to_string()))?;

        info!("Session established to {} ({})", server_name, addr);

        Ok(Session::new(connection))
    }
}
