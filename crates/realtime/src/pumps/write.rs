//! WebSocket write pump: serialises outbound Engine.IO packets.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use oddsdesk_protocol::EnginePacket;

/// Writes packets to the WebSocket, one text frame per packet.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut output_rx: mpsc::Receiver<EnginePacket>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            packet = output_rx.recv() => {
                match packet {
                    Some(p) => {
                        let text = match p.encode() {
                            Ok(t) => t,
                            Err(e) => {
                                warn!("failed to encode packet: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(tungstenite::Message::Text(text.into())).await {
                            error!("WebSocket write error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
