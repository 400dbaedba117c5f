//! Agent connection lifecycle

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use culvert_session::{SessionConfig, SessionConnector, IDENTIFIER_LEN};

use crate::forwarder::forward_stream;
use crate::{AgentError, AgentResult};

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay address to dial (host:port)
    pub relay_addr: String,
    /// Server name expected on the relay's certificate
    pub server_name: String,
    /// Address incoming streams are forwarded to (host:port)
    pub target_addr: String,
    /// Identifier reported to the relay
    pub identifier: String,
    /// Skip certificate verification
    pub insecure: bool,
}

/// Reverse-connecting agent
///
/// Connects to the relay, announces its identifier, then forwards every
/// stream the relay opens to the target address until the session closes.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self) -> AgentResult<()> {
        let relay_addr = tokio::net::lookup_host(&self.config.relay_addr)
            .await?
            .next()
            .ok_or_else(|| AgentError::Resolve(self.config.relay_addr.clone()))?;

        let session_config = if self.config.insecure {
            SessionConfig::client_insecure()
        } else {
            SessionConfig::client()
        };

        let connector = SessionConnector::new(&session_config)?;
        let session = connector
            .connect(relay_addr, &self.config.server_name)
            .await?;
        info!("Connected to relay at {}", relay_addr);

        // Announce the identifier: one stream, the raw bytes, nothing else.
        // The relay reads it into a fixed 255-byte buffer.
        let mut stream = session.open_stream().await?;
        stream.write_all(identifier_payload(&self.config.identifier)).await?;
        stream.finish()?;
        drop(stream);

        info!("Registered with relay as '{}'", self.config.identifier);

        loop {
            match session.accept_stream().await? {
                Some(stream) => {
                    debug!("Relay opened stream {}", stream.stream_id());
                    let target = self.config.target_addr.clone();
                    tokio::spawn(forward_stream(stream, target));
                }
                None => {
                    match session.close_reason() {
                        Some(reason) => info!("Relay session closed: {}", reason),
                        None => info!("Relay session closed"),
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// Identifier bytes as sent on the wire, truncated to the fixed size
fn identifier_payload(identifier: &str) -> &[u8] {
    let bytes = identifier.as_bytes();
    if bytes.len() > IDENTIFIER_LEN {
        warn!(
            "Identifier is {} bytes, truncating to {}",
            bytes.len(),
            IDENTIFIER_LEN
        );
        &bytes[..IDENTIFIER_LEN]
    } else {
        bytes
    }
}
