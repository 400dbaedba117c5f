//! Agent-facing listener: accepts sessions and registers them in the pool

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use culvert_session::{Session, SessionConfig, SessionListener, IDENTIFIER_LEN};

use crate::display_id;
use crate::pool::SessionPool;
use crate::RelayResult;

/// Accepts encrypted agent connections and feeds the session pool
///
/// Each accepted session is handled on its own task: a liveness probe, a
/// best-effort read of the agent's self-reported identifier, then
/// registration. A failure anywhere in that sequence abandons that one
/// session; the accept loop itself keeps running until the listening
/// socket fails.
pub struct AgentListener {
    listener: SessionListener,
    pool: Arc<SessionPool<Session>>,
}

impl AgentListener {
    pub fn bind(
        addr: SocketAddr,
        config: &SessionConfig,
        pool: Arc<SessionPool<Session>>,
    ) -> RelayResult<Self> {
        let listener = SessionListener::bind(addr, config)?;
        Ok(Self { listener, pool })
    }

    pub fn local_addr(&self) -> RelayResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept agent sessions until the listener itself fails
    ///
    /// An error from accept means the socket is unusable and terminates
    /// this listener; per-session failures never do.
    pub async fn run(self) -> RelayResult<()> {
        loop {
            let session = self.listener.accept().await?;
            info!("Agent connected from {}", session.remote_address());

            let pool = self.pool.clone();
            tokio::spawn(handle_agent_session(pool, session));
        }
    }
}

/// Probe, identify, and register one freshly accepted session
async fn handle_agent_session(pool: Arc<SessionPool<Session>>, session: Session) {
    let remote = session.remote_address();

    match session.probe() {
        Ok(rtt) => debug!("Session ping: {:?}", rtt),
        Err(e) => {
            error!("Liveness probe failed for agent {}: {}", remote, e);
            return;
        }
    }

    let mut stream = match session.accept_stream().await {
        Ok(Some(stream)) => stream,
        Ok(None) => {
            error!("Agent {} closed the session before identifying itself", remote);
            return;
        }
        Err(e) => {
            error!("Failed to accept identifier stream from {}: {}", remote, e);
            return;
        }
    };

    // One read into a fixed buffer, no framing: the identifier is whatever
    // bytes landed there, trailing zeros included. A failed read still
    // registers the session, just under a blank identifier.
    let mut identifier = [0u8; IDENTIFIER_LEN];
    if let Err(e) = stream.read(&mut identifier).await {
        warn!("Failed to read identifier from agent {}: {}", remote, e);
    }
    drop(stream);

    let proposed = String::from_utf8_lossy(&identifier).into_owned();
    let assigned = pool.register(&proposed, session);
    info!(
        "New session '{}' added to pool from {} ({} available)",
        display_id(&assigned),
        remote,
        pool.len()
    );
}
