//! Port supervisor: fans the configured ports out to independent listener
//! pipelines and joins them all before returning.
//!
//! Every pipeline gets its own receiver on the process-wide shutdown channel,
//! so stopping the process stops every forwarded port together. A failure in
//! one pipeline (bind error, dial error, relay error) never affects another.

use super::{connector, listener::Listener, pair};
use crate::config::RelayConfig;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Run one listener pipeline per configured port until shutdown, returning
/// only after every pipeline has fully drained.
pub async fn run(config: RelayConfig, shutdown: broadcast::Sender<()>) {
    info!(%config, "starting relay");

    // Pair ids are allocated from one shared counter so log lines correlate
    // across ports without any global mutable state.
    let pair_ids = Arc::new(AtomicU64::new(1));
    let mut pipelines = JoinSet::new();

    for &port in config.ports() {
        let local = SocketAddr::new(config.local(), port);
        let remote = SocketAddr::new(config.remote(), port);
        pipelines.spawn(run_port(
            local,
            remote,
            shutdown.clone(),
            pair_ids.clone(),
        ));
    }

    while pipelines.join_next().await.is_some() {}

    info!("relay stopped");
}

/// One port's pipeline: bind, accept, dial, relay.
///
/// A bind failure aborts only this pipeline. A dial failure drops the
/// accepted inbound connection and spawns nothing (fail-fast, no partial
/// relay is ever started).
async fn run_port(
    local: SocketAddr,
    remote: SocketAddr,
    shutdown: broadcast::Sender<()>,
    pair_ids: Arc<AtomicU64>,
) {
    let listener = match Listener::bind(local).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%local, error = %e, "port pipeline aborted");
            return;
        }
    };

    info!(%local, %remote, "forwarding");

    let accept_shutdown = shutdown.subscribe();
    listener
        .run(accept_shutdown, move |inbound, peer| {
            let pair_id = pair_ids.fetch_add(1, Ordering::Relaxed);
            let pair_shutdown = shutdown.subscribe();
            async move {
                match connector::connect_remote(remote).await {
                    Ok(outbound) => pair::run(pair_id, inbound, outbound, pair_shutdown).await,
                    Err(e) => {
                        // Dropping the inbound connection closes it.
                        warn!(pair_id, peer = %peer, error = %e, "dropping inbound connection");
                    }
                }
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    const BOUND: Duration = Duration::from_secs(2);

    /// Upstream stands in for the remote peer on a second loopback address,
    /// so the forwarded port number can be identical on both sides.
    const UPSTREAM_IP: &str = "127.0.0.2";

    fn test_config(ports: &[u16]) -> RelayConfig {
        let list = ports
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        RelayConfig::load(None, Some("127.0.0.1"), Some(UPSTREAM_IP), Some(&list)).unwrap()
    }

    /// Bind an upstream socket on an ephemeral port and serve `conns`
    /// connections with the given handler before exiting.
    async fn spawn_upstream<F, Fut>(conns: usize, handle: F) -> u16
    where
        F: Fn(TcpStream) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind((UPSTREAM_IP, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            for _ in 0..conns {
                let (conn, _) = listener.accept().await.unwrap();
                tokio::spawn(handle(conn));
            }
        });
        port
    }

    async fn echo(mut conn: TcpStream) {
        let mut buf = [0u8; 1024];
        loop {
            match conn.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if conn.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_ping_pong_through_relay() {
        let port = spawn_upstream(1, |mut conn| async move {
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"PING");
            conn.write_all(b"PONG").await.unwrap();
        })
        .await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let supervisor = tokio::spawn(run(test_config(&[port]), shutdown_tx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client.write_all(b"PING").await.unwrap();
        let mut buf = [0u8; 4];
        timeout(BOUND, client.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"PONG");
        drop(client);

        shutdown_tx.send(()).unwrap();
        timeout(BOUND, supervisor).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dial_failure_closes_inbound() {
        // An upstream port with nothing listening behind it.
        let dead = TcpListener::bind((UPSTREAM_IP, 0)).await.unwrap();
        let port = dead.local_addr().unwrap().port();
        drop(dead);

        let (shutdown_tx, _) = broadcast::channel(1);
        let supervisor = tokio::spawn(run(test_config(&[port]), shutdown_tx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut buf = [0u8; 1];
        let n = timeout(BOUND, client.read(&mut buf)).await.unwrap().unwrap();
        assert_eq!(n, 0, "inbound connection must be closed after dial failure");

        shutdown_tx.send(()).unwrap();
        timeout(BOUND, supervisor).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        // Two ports, several sessions each; one session aborts mid-stream.
        let port_a = spawn_upstream(4, echo).await;
        let port_b = spawn_upstream(3, echo).await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let supervisor = tokio::spawn(run(test_config(&[port_a, port_b]), shutdown_tx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The failing session: connect and slam the door.
        let aborted = TcpStream::connect(("127.0.0.1", port_a)).await.unwrap();
        drop(aborted);

        let mut sessions = JoinSet::new();
        for (port, tag) in [(port_a, 0u8), (port_b, 1u8)] {
            for i in 0..3u8 {
                sessions.spawn(async move {
                    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
                    let msg = [tag, i, b'x'];
                    client.write_all(&msg).await.unwrap();
                    let mut buf = [0u8; 3];
                    client.read_exact(&mut buf).await.unwrap();
                    assert_eq!(buf, msg);
                });
            }
        }
        while let Some(session) = timeout(BOUND, sessions.join_next()).await.unwrap() {
            session.unwrap();
        }

        shutdown_tx.send(()).unwrap();
        timeout(BOUND, supervisor).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_aborts_only_that_port() {
        // Occupy one local port so the pipeline for it fails to bind.
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let free_port = spawn_upstream(1, echo).await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let supervisor = tokio::spawn(run(
            test_config(&[taken_port, free_port]),
            shutdown_tx.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The other port still relays.
        let mut client = TcpStream::connect(("127.0.0.1", free_port)).await.unwrap();
        client.write_all(b"ok?").await.unwrap();
        let mut buf = [0u8; 3];
        timeout(BOUND, client.read_exact(&mut buf)).await.unwrap().unwrap();
        assert_eq!(&buf, b"ok?");
        drop(client);

        shutdown_tx.send(()).unwrap();
        timeout(BOUND, supervisor).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_port() {
        let port_a = spawn_upstream(0, echo).await;
        let port_b = spawn_upstream(0, echo).await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let supervisor = tokio::spawn(run(test_config(&[port_a, port_b]), shutdown_tx.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown_tx.send(()).unwrap();
        timeout(BOUND, supervisor).await.unwrap().unwrap();

        assert!(TcpStream::connect(("127.0.0.1", port_a)).await.is_err());
        assert!(TcpStream::connect(("127.0.0.1", port_b)).await.is_err());
    }
}
