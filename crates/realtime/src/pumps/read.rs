//! WebSocket read pump: decodes incoming Engine.IO packets.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use oddsdesk_protocol::EnginePacket;
use oddsdesk_protocol::constants::MAX_MESSAGE_SIZE;

use crate::transport::DisconnectReason;
use crate::transport::socketio::EngineInput;

/// Reads frames from the WebSocket and forwards decoded packets.
///
/// Liveness is judged by the session loop, which resets its ping deadline
/// on every forwarded packet. When the stream ends the pump reports why.
pub(crate) async fn read_pump<S>(
    mut read: S,
    input_tx: mpsc::Sender<EngineInput>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let mut reason = DisconnectReason::TransportClose;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,

            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if text.len() > MAX_MESSAGE_SIZE {
                            warn!("message too large ({} bytes), dropping", text.len());
                            continue;
                        }
                        match EnginePacket::decode(&text) {
                            Ok(packet) => {
                                if input_tx.send(EngineInput::Packet(packet)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!("failed to decode packet: {e}"),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        debug!(?frame, "received close frame");
                        break;
                    }
                    Some(Ok(tungstenite::Message::Binary(_))) => {
                        warn!("binary frames are not supported, dropping");
                    }
                    Some(Ok(_)) => trace!("control frame"),
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        reason = DisconnectReason::TransportError;
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    let _ = input_tx.send(EngineInput::Closed(reason)).await;
}
