//! Heartbeat pump: periodic application-level pings.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use oddsdesk_protocol::ClientEvent;
use oddsdesk_protocol::messages::Heartbeat;

use crate::transport::Outbound;

/// Emits a `ping` event every `period` until cancelled.
///
/// Purely a liveness signal: a missed ping never closes the connection.
pub(crate) async fn heartbeat_pump(
    outbound: mpsc::Sender<Outbound>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                trace!("sending heartbeat");
                let ping = Outbound::client(ClientEvent::Ping, &Heartbeat::now());
                if outbound.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }
}
