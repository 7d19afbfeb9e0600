//! Outbound side of a relay pair: dials the remote peer for one accepted
//! inbound connection. No retry, no timeout beyond OS defaults.

use crate::error::{RelayError, RelayResult};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::debug;

/// Open one outbound connection to the remote peer.
///
/// On failure the caller must drop the already-accepted inbound connection;
/// no relay pair is ever started half-connected.
pub async fn connect_remote(addr: SocketAddr) -> RelayResult<TcpStream> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|source| RelayError::Dial { addr, source })?;

    debug!(remote = %addr, "outbound connection established");
    Ok(stream)
}
