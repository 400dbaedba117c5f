//! Local-facing listener: forwards plain TCP connections through the
//! currently selected agent session
//!
//! Failover happens in two places on purpose. A background watcher parks
//! on the bound session's closure signal and evicts and reselects when it
//! fires. Independently, every accepted connection re-checks the binding
//! itself and performs the same eviction if it catches a dead session the
//! watcher has not noticed yet. In-flight relays are untouched by either
//! path: they run on session handles captured before the eviction.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use culvert_session::Session;

use crate::display_id;
use crate::relay::relay;
use crate::select::Selector;
use crate::RelayResult;

/// Accepts plain local connections and relays each through the selected
/// session as one logical stream
pub struct ForwardListener {
    listener: TcpListener,
    selector: Arc<Selector<Session>>,
}

impl ForwardListener {
    pub async fn bind(addr: SocketAddr, selector: Arc<Selector<Session>>) -> RelayResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Forward listener bound to {}", listener.local_addr()?);
        Ok(Self { listener, selector })
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve forwarded connections until the listening socket fails
    ///
    /// Blocks until a session is selected before the first accept, then
    /// keeps the failover watcher running alongside the accept loop. An
    /// accept error is fatal to this listener; per-connection failures
    /// never are.
    pub async fn run(self) -> RelayResult<()> {
        if let Err(e) = self.selector.ensure_selected().await {
            warn!("Starting without a bound session, selection failed: {}", e);
        }

        tokio::spawn(failover_watcher(self.selector.clone()));

        loop {
            let (conn, peer) = self.listener.accept().await?;
            debug!("New proxy connection from {}", peer);

            let selector = self.selector.clone();
            tokio::spawn(handle_forward_connection(selector, conn));
        }
    }
}

/// Relay one accepted connection through the bound session
///
/// With no usable session the connection is closed on the spot and the
/// binding is healed for the connections that follow.
async fn handle_forward_connection(selector: Arc<Selector<Session>>, conn: TcpStream) {
    match selector.current() {
        Some((id, session)) if !session.is_closed() => {
            let stream = match session.open_stream().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to open stream on session '{}': {}", display_id(&id), e);
                    return;
                }
            };

            debug!("New proxy connection, establishing stream on session '{}'", display_id(&id));

            match relay(conn, stream).await {
                Ok(bytes) => debug!("Relay done, {} bytes in the closing direction", bytes),
                Err(e) => debug!("Relay ended: {}", e),
            }
        }
        current => {
            warn!("Closing connection because no agent session is available");
            drop(conn);

            if !selector.pool().is_empty() {
                if let Some((dead_id, _)) = current {
                    selector.evict(&dead_id);
                }
                if let Err(e) = selector.ensure_selected().await {
                    warn!("Session selection failed: {}", e);
                }
            }
        }
    }
}

/// Watch the bound session and replace it when it closes
///
/// Re-arms on every selection change, so after an operator switches
/// sessions the watcher immediately tracks the new one. Runs until the
/// pool itself is gone.
async fn failover_watcher(selector: Arc<Selector<Session>>) {
    let mut selection_rx = selector.pool().watch_selection();

    loop {
        match selector.current() {
            None => {
                if selection_rx.changed().await.is_err() {
                    return;
                }
            }
            Some((id, session)) => {
                tokio::select! {
                    reason = session.closed() => {
                        warn!("Received session shutdown from '{}': {}", display_id(&id), reason);
                        selector.evict(&id);
                        if let Err(e) = selector.ensure_selected().await {
                            warn!("Session selection failed: {}", e);
                        }
                    }
                    changed = selection_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
