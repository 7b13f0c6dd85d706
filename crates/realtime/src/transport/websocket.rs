//! WebSocket upgrade of a polling session.
//!
//! The upgrade is opportunistic: proxies and load balancers routinely block
//! it, so any failure here leaves the session on long-polling.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use oddsdesk_protocol::EnginePacket;
use oddsdesk_protocol::constants::{MAX_MESSAGE_SIZE, PROBE_PAYLOAD};

use crate::error::RealtimeError;
use crate::transport::socketio::EngineInput;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens a WebSocket for an existing session and runs the probe exchange.
///
/// Sends `2probe`, expects `3probe`, then commits with `5`. Once this
/// returns the server routes the session over the socket.
pub(crate) async fn upgrade(url: &Url, probe_timeout: Duration) -> Result<WsStream, RealtimeError> {
    let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(MAX_MESSAGE_SIZE);

    let (mut ws, _) = tokio::time::timeout(
        probe_timeout,
        tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false),
    )
    .await
    .map_err(|_| RealtimeError::Timeout)??;

    let probe = EnginePacket::Ping(Some(PROBE_PAYLOAD.into())).encode()?;
    ws.send(tungstenite::Message::Text(probe.into())).await?;

    let reply = tokio::time::timeout(probe_timeout, ws.next())
        .await
        .map_err(|_| RealtimeError::Timeout)?;
    match reply {
        Some(Ok(tungstenite::Message::Text(text)))
            if EnginePacket::decode(&text).is_ok_and(|p| p.is_probe_reply()) => {}
        Some(Ok(other)) => {
            return Err(RealtimeError::Protocol(format!(
                "unexpected probe reply: {other:?}"
            )));
        }
        Some(Err(e)) => return Err(e.into()),
        None => return Err(RealtimeError::Protocol("socket closed during probe".into())),
    }

    ws.send(tungstenite::Message::Text(EnginePacket::Upgrade.encode()?.into()))
        .await?;
    debug!(url = %url, "upgraded to WebSocket");
    Ok(ws)
}

/// Starts the read and write pumps over an upgraded socket.
pub(crate) fn spawn(
    ws: WsStream,
    input_tx: mpsc::Sender<EngineInput>,
    output_rx: mpsc::Receiver<EnginePacket>,
    reader_cancel: CancellationToken,
    writer_cancel: CancellationToken,
) {
    let (write, read) = ws.split();
    tokio::spawn(crate::pumps::write::write_pump(write, output_rx, writer_cancel));
    tokio::spawn(crate::pumps::read::read_pump(read, input_tx, reader_cancel));
}
