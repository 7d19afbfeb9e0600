//! Unidirectional pumps: one moves bytes from a connection into a bounded
//! single-slot queue, the other drains a queue into a connection.
//!
//! Each relay pair runs four of these (a reader and a writer per direction).
//! The queues have capacity 1, so a stalled writer exerts backpressure on its
//! own direction's reader through the full queue without ever touching the
//! opposite direction. Pumps are generic over the stream halves so tests can
//! drive them with in-memory duplex streams.

use super::CHUNK_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Read chunks from `conn` and push each onto the queue.
///
/// Stops on EOF, read error, pair cancellation, or a closed queue. Dropping
/// the sender on return is what closes the queue for the paired writer.
/// Returns the number of bytes read.
pub async fn read_pump<R>(
    mut conn: R,
    queue: mpsc::Sender<Vec<u8>>,
    mut cancel: broadcast::Receiver<()>,
    pair_id: u64,
    dir: &'static str,
) -> u64
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.recv() => {
                debug!(pair_id, dir, "read pump cancelled");
                break;
            }
            result = conn.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!(pair_id, dir, "peer closed connection");
                        break;
                    }
                    Ok(n) => {
                        total += n as u64;
                        // Copy-on-send: the chunk is owned by the queue, so a
                        // subsequent read can never overwrite bytes that are
                        // still pending write on the other side.
                        let chunk = buf[..n].to_vec();
                        tokio::select! {
                            _ = cancel.recv() => {
                                debug!(pair_id, dir, "read pump cancelled");
                                break;
                            }
                            sent = queue.send(chunk) => {
                                if sent.is_err() {
                                    debug!(pair_id, dir, "queue closed, read pump done");
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        warn!(pair_id, dir, error = %e, "read error");
                        break;
                    }
                }
            }
        }
    }

    total
}

/// Pop chunks from the queue and write each to `conn` in full.
///
/// A closed queue is the normal end of the direction: the write half is shut
/// down (FIN) and the pair cancel is fired so the reverse direction unwinds
/// in bounded time. A write error also fires the pair cancel, which closes
/// the source connection of the opposite direction through its reader.
/// Returns the number of bytes written.
pub async fn write_pump<W>(
    mut conn: W,
    mut queue: mpsc::Receiver<Vec<u8>>,
    cancel_tx: broadcast::Sender<()>,
    mut cancel: broadcast::Receiver<()>,
    pair_id: u64,
    dir: &'static str,
) -> u64
where
    W: AsyncWrite + Unpin,
{
    let mut total: u64 = 0;

    loop {
        tokio::select! {
            _ = cancel.recv() => {
                debug!(pair_id, dir, "write pump cancelled");
                break;
            }
            chunk = queue.recv() => {
                match chunk {
                    Some(chunk) => {
                        tokio::select! {
                            _ = cancel.recv() => {
                                debug!(pair_id, dir, "write pump cancelled");
                                break;
                            }
                            result = conn.write_all(&chunk) => {
                                if let Err(e) = result {
                                    warn!(pair_id, dir, error = %e, "write error");
                                    let _ = cancel_tx.send(());
                                    break;
                                }
                                total += chunk.len() as u64;
                            }
                        }
                    }
                    None => {
                        debug!(pair_id, dir, "queue closed, write pump done");
                        let _ = conn.shutdown().await;
                        let _ = cancel_tx.send(());
                        break;
                    }
                }
            }
        }
    }

    total
}
