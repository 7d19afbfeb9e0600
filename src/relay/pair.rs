//! Connection-pair relay: the full bidirectional copy between one accepted
//! inbound connection and its dialed outbound counterpart.
//!
//! Each pair owns two single-slot queues and four pumps. A pair moves
//! through accepted → dialed → relaying → draining → closed; the controller
//! below is the relaying-to-closed part, and closed is reached exactly once,
//! only after all four pumps have joined. Teardown cascades: a read EOF
//! closes its queue, the paired writer drains, sends FIN, and cancels the
//! pair scope; a write error cancels the scope directly. Either way every
//! pump stops in bounded time and both connections are dropped.

use super::pump;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Run one relay pair to completion.
///
/// Splits both connections, spawns the four pumps, and waits on the join
/// barrier while watching the parent shutdown signal. Both connections are
/// closed (dropped) unconditionally before this returns.
pub async fn run<A, B>(pair_id: u64, inbound: A, outbound: B, mut shutdown: broadcast::Receiver<()>)
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (in_read, in_write) = tokio::io::split(inbound);
    let (out_read, out_write) = tokio::io::split(outbound);

    // One single-slot queue per direction.
    let (in_to_out_tx, in_to_out_rx) = mpsc::channel::<Vec<u8>>(1);
    let (out_to_in_tx, out_to_in_rx) = mpsc::channel::<Vec<u8>>(1);

    // Pair-scoped cancel: any pump failure or the parent shutdown fans out
    // to all four pumps.
    let (cancel_tx, _) = broadcast::channel::<()>(1);

    debug!(pair_id, "relay pair started");

    let in_reader = tokio::spawn(pump::read_pump(
        in_read,
        in_to_out_tx,
        cancel_tx.subscribe(),
        pair_id,
        "in->out",
    ));
    let out_writer = tokio::spawn(pump::write_pump(
        out_write,
        in_to_out_rx,
        cancel_tx.clone(),
        cancel_tx.subscribe(),
        pair_id,
        "in->out",
    ));
    let out_reader = tokio::spawn(pump::read_pump(
        out_read,
        out_to_in_tx,
        cancel_tx.subscribe(),
        pair_id,
        "out->in",
    ));
    let in_writer = tokio::spawn(pump::write_pump(
        in_write,
        out_to_in_rx,
        cancel_tx.clone(),
        cancel_tx.subscribe(),
        pair_id,
        "out->in",
    ));

    // Join barrier over all four pumps. The stream halves live inside the
    // pump tasks, so once the barrier clears both connections are dropped.
    let barrier = async move {
        let sent = out_writer.await.unwrap_or(0);
        let received = in_writer.await.unwrap_or(0);
        let _ = in_reader.await;
        let _ = out_reader.await;
        (sent, received)
    };
    tokio::pin!(barrier);

    let (sent, received) = tokio::select! {
        _ = shutdown.recv() => {
            debug!(pair_id, "relay pair cancelled");
            let _ = cancel_tx.send(());
            barrier.await
        }
        totals = &mut barrier => totals,
    };

    info!(pair_id, sent, received, "relay pair closed");
}
