//! Per-stream TCP forwarding

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use culvert_session::SessionStream;

/// Errors that can occur during TCP forwarding
#[derive(Error, Debug)]
pub enum ForwarderError {
    #[error("Failed to connect to target {address}: {source}")]
    ConnectionFailed {
        address: String,
        source: std::io::Error,
    },

    #[error("IO error during forwarding: {0}")]
    Io(#[from] std::io::Error),
}

/// Forward one relay stream to the target, logging the outcome
///
/// Entry point for spawned per-stream tasks; a failure ends this stream,
/// never the agent.
pub async fn forward_stream(stream: SessionStream, target: String) {
    let stream_id = stream.stream_id();
    match forward(stream, &target).await {
        Ok(bytes) => {
            tracing::debug!(stream_id, bytes, "Forward completed");
        }
        Err(e) => {
            tracing::error!(stream_id, "Forward failed: {}", e);
        }
    }
}

/// Relay bytes between a tunnel stream and a fresh TCP connection
///
/// Both directions run concurrently; whichever stops first, by EOF or by
/// error, shuts the whole forward down and both endpoints with it.
/// Returns the bytes moved in the direction that terminated.
pub async fn forward(stream: SessionStream, target: &str) -> Result<u64, ForwarderError> {
    tracing::debug!(target = %target, "Starting TCP forward");

    let tcp = TcpStream::connect(target)
        .await
        .map_err(|e| ForwarderError::ConnectionFailed {
            address: target.to_string(),
            source: e,
        })?;

    let (mut stream_read, mut stream_write) = tokio::io::split(stream);
    let (mut tcp_read, mut tcp_write) = tokio::io::split(tcp);

    let result = tokio::select! {
        res = tokio::io::copy(&mut stream_read, &mut tcp_write) => res,
        res = tokio::io::copy(&mut tcp_read, &mut stream_write) => res,
    };

    let _ = stream_write.shutdown().await;
    let _ = tcp_write.shutdown().await;

    Ok(result?)
}
