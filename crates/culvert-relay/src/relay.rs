//! Byte relay between a proxied client and an agent stream
//!
//! Two unidirectional copies run concurrently. The first one to stop,
//! whether by clean EOF or by error, tears the whole relay down: both
//! write sides are shut down and both endpoints drop when the call
//! returns. Nothing is buffered beyond the copy itself and nothing is
//! retransmitted.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Shuttle bytes between `client` and `upstream` until either side stops
///
/// Returns the number of bytes moved by the direction that terminated
/// first; the opposite copy is cancelled mid-flight and its tally is
/// discarded. An I/O error in the terminating direction surfaces as the
/// error value, after both endpoints have been shut down all the same.
pub async fn relay<C, U>(client: C, upstream: U) -> std::io::Result<u64>
where
    C: AsyncRead + AsyncWrite,
    U: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let result = tokio::select! {
        res = tokio::io::copy(&mut client_read, &mut upstream_write) => {
            debug!("Relay finished in client-to-upstream direction");
            res
        }
        res = tokio::io::copy(&mut upstream_read, &mut client_write) => {
            debug!("Relay finished in upstream-to-client direction");
            res
        }
    };

    // Close both endpoints regardless of which direction ended or why.
    // Failures here mean the peer is already gone, which is the goal.
    let _ = client_write.shutdown().await;
    let _ = upstream_write.shutdown().await;

    result
}
