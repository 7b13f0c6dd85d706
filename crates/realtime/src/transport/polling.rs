//! HTTP long-polling channel.
//!
//! Every channel starts here: the Engine.IO handshake is a polling `GET`,
//! and sessions whose WebSocket upgrade fails stay on polling for their
//! whole lifetime.

use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use oddsdesk_protocol::EnginePacket;
use oddsdesk_protocol::Handshake;
use oddsdesk_protocol::engine::{decode_payload, encode_payload};

use crate::error::RealtimeError;
use crate::transport::DisconnectReason;
use crate::transport::socketio::EngineInput;

/// Performs the Engine.IO handshake.
///
/// Returns the handshake and any packets the server bundled with it.
pub(crate) async fn handshake(
    http: &reqwest::Client,
    url: &Url,
) -> Result<(Handshake, Vec<EnginePacket>), RealtimeError> {
    let body = fetch(http, url).await?;

    let mut handshake = None;
    let mut rest = Vec::new();
    for packet in decode_payload(&body) {
        match packet? {
            EnginePacket::Open(h) if handshake.is_none() => handshake = Some(h),
            other => rest.push(other),
        }
    }

    let handshake = handshake
        .ok_or_else(|| RealtimeError::Protocol("handshake response without open packet".into()))?;
    Ok((handshake, rest))
}

/// Starts the polling reader and writer for an open session.
pub(crate) fn spawn(
    http: reqwest::Client,
    url: Url,
    input_tx: mpsc::Sender<EngineInput>,
    output_rx: mpsc::Receiver<EnginePacket>,
    reader_cancel: CancellationToken,
    writer_cancel: CancellationToken,
) {
    tokio::spawn(poll_pump(
        http.clone(),
        url.clone(),
        input_tx.clone(),
        reader_cancel,
    ));
    tokio::spawn(post_pump(http, url, output_rx, input_tx, writer_cancel));
}

/// Issues long-poll `GET`s and forwards every decoded packet.
async fn poll_pump(
    http: reqwest::Client,
    url: Url,
    input_tx: mpsc::Sender<EngineInput>,
    cancel: CancellationToken,
) {
    loop {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            body = fetch(&http, &url) => body,
        };

        let body = match body {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "long-poll request failed");
                let _ = input_tx
                    .send(EngineInput::Closed(DisconnectReason::TransportError))
                    .await;
                return;
            }
        };

        for packet in decode_payload(&body) {
            match packet {
                Ok(EnginePacket::Noop) => trace!("noop"),
                Ok(packet) => {
                    let closing = packet == EnginePacket::Close;
                    if input_tx.send(EngineInput::Packet(packet)).await.is_err() || closing {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "dropping undecodable polling packet"),
            }
        }
    }
}

/// Batches queued packets into `POST`s.
///
/// Runs until the session drops its sender, so a graceful close still
/// flushes whatever was queued before it.
async fn post_pump(
    http: reqwest::Client,
    url: Url,
    mut output_rx: mpsc::Receiver<EnginePacket>,
    input_tx: mpsc::Sender<EngineInput>,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            packet = output_rx.recv() => match packet {
                Some(p) => p,
                None => break,
            },
        };

        let mut batch = vec![first];
        while let Ok(p) = output_rx.try_recv() {
            batch.push(p);
        }
        let closing = batch.contains(&EnginePacket::Close);

        let body = match encode_payload(&batch) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "failed to encode polling batch");
                continue;
            }
        };

        if let Err(e) = post(&http, &url, body).await {
            warn!(error = %e, "polling write failed");
            let _ = input_tx
                .send(EngineInput::Closed(DisconnectReason::TransportError))
                .await;
            break;
        }
        if closing {
            debug!("polling channel closed");
            break;
        }
    }
}

async fn fetch(http: &reqwest::Client, url: &Url) -> Result<String, reqwest::Error> {
    http.get(cache_busted(url))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await
}

async fn post(http: &reqwest::Client, url: &Url, body: String) -> Result<(), reqwest::Error> {
    http.post(cache_busted(url))
        .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
        .body(body)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Appends a unique `t` parameter so intermediaries never serve a cached poll.
fn cache_busted(url: &Url) -> Url {
    let mut url = url.clone();
    url.query_pairs_mut()
        .append_pair("t", &uuid::Uuid::new_v4().simple().to_string());
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_buster_is_unique() {
        let url = Url::parse("http://localhost:4000/socket.io/?EIO=4&transport=polling").unwrap();
        let a = cache_busted(&url);
        let b = cache_busted(&url);
        assert_ne!(a, b);
        assert!(a.query().unwrap().starts_with("EIO=4&transport=polling&t="));
    }

    #[tokio::test]
    async fn post_pump_stops_when_sender_dropped() {
        let http = reqwest::Client::new();
        let url = Url::parse("http://127.0.0.1:9/socket.io/").unwrap();
        let (output_tx, output_rx) = mpsc::channel(4);
        let (input_tx, _input_rx) = mpsc::channel(4);
        drop(output_tx);

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            post_pump(http, url, output_rx, input_tx, CancellationToken::new()),
        )
        .await
        .expect("should stop");
    }

    #[tokio::test]
    async fn poll_pump_stops_on_cancel() {
        let http = reqwest::Client::new();
        let url = Url::parse("http://127.0.0.1:9/socket.io/").unwrap();
        let (input_tx, _input_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            poll_pump(http, url, input_tx, cancel),
        )
        .await
        .expect("should stop");
    }
}
