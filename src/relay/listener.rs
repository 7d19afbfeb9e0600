//! Inbound side of a port pipeline: binds one local address and runs the
//! accept loop, handing every accepted connection to a caller-supplied
//! handler spawned as its own task.
//!
//! Shutdown closes the listening socket so no new connections are accepted,
//! then joins every handler that was spawned, so a listener never outlives
//! the relay pairs it created.

use crate::error::{RelayError, RelayResult};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A bound listening socket, ready to run its accept loop.
pub struct Listener {
    inner: TcpListener,
    addr: SocketAddr,
}

impl Listener {
    /// Bind to `addr`. Fails immediately with [`RelayError::Listen`]; there
    /// is no retry.
    pub async fn bind(addr: SocketAddr) -> RelayResult<Self> {
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Listen { addr, source })?;

        // May differ from the requested address when port 0 was asked for.
        let addr = inner.local_addr().unwrap_or(addr);
        info!(%addr, "listening");
        Ok(Self { inner, addr })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run the accept loop until shutdown or an accept error, then join every
    /// spawned handler before returning.
    ///
    /// A shutdown-triggered exit is normal operation; an accept error after a
    /// successful bind is logged and terminates the loop. Either way the
    /// listening socket is closed before the handlers are drained, so new
    /// connection attempts are refused while existing sessions finish.
    pub async fn run<H, Fut>(self, mut shutdown: broadcast::Receiver<()>, handler: H)
    where
        H: Fn(TcpStream, SocketAddr) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(addr = %self.addr, "listener cancelled");
                    break;
                }
                result = self.inner.accept() => {
                    match result {
                        Ok((conn, peer)) => {
                            debug!(addr = %self.addr, peer = %peer, "connection accepted");
                            handlers.spawn(handler(conn, peer));
                        }
                        Err(e) => {
                            warn!(addr = %self.addr, error = %e, "accept failed");
                            break;
                        }
                    }
                }
            }
        }

        // Close the socket first, then drain the handlers.
        drop(self.inner);
        while handlers.join_next().await.is_some() {}

        info!(addr = %self.addr, "listener stopped");
    }
}
