//! Socket.IO client transport.
//!
//! Opens an Engine.IO session over long-polling, tries to upgrade it to a
//! WebSocket, sends the Socket.IO CONNECT with the bearer token and then
//! translates packets to and from [`TransportEvent`]s / [`Outbound`]
//! commands until either side closes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use oddsdesk_protocol::constants::{
    DEFAULT_NAMESPACE, DEFAULT_PATH, ENGINE_IO_VERSION, UPGRADE_PROBE_TIMEOUT,
};
use oddsdesk_protocol::{EnginePacket, SocketPacket};

use crate::error::RealtimeError;
use crate::transport::{
    Connector, DisconnectReason, INBOUND_CAPACITY, OUTBOUND_CAPACITY, OpenRequest, Outbound,
    TransportEvent, TransportLink, polling, websocket,
};

/// Input from the engine pumps to the session loop.
#[derive(Debug)]
pub(crate) enum EngineInput {
    Packet(EnginePacket),
    Closed(DisconnectReason),
}

/// Options for the Socket.IO transport.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Mount path of the endpoint.
    pub path: String,
    /// Try to upgrade from long-polling to WebSocket.
    pub upgrade: bool,
    pub probe_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.into(),
            upgrade: true,
            probe_timeout: UPGRADE_PROBE_TIMEOUT,
        }
    }
}

/// [`Connector`] speaking Socket.IO v5 over Engine.IO v4.
pub struct SocketIoConnector {
    http: reqwest::Client,
    options: TransportOptions,
}

impl SocketIoConnector {
    pub fn new(options: TransportOptions) -> Result<Self, RealtimeError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("oddsdesk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, options })
    }
}

impl Connector for SocketIoConnector {
    fn open(&self, request: OpenRequest) -> TransportLink {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        tokio::spawn(run_session(
            self.http.clone(),
            self.options.clone(),
            request,
            outbound_rx,
            inbound_tx,
            connected.clone(),
            cancel.clone(),
        ));

        TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            connected,
            cancel,
        }
    }
}

/// Builds the Engine.IO URL for a transport kind.
pub(crate) fn engine_url(
    endpoint: &str,
    path: &str,
    transport: &str,
    sid: Option<&str>,
) -> Result<Url, RealtimeError> {
    let mut url = Url::parse(endpoint)?;
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}/{}", path.trim_start_matches('/')));
    url.set_query(None);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", &ENGINE_IO_VERSION.to_string());
        query.append_pair("transport", transport);
        if let Some(sid) = sid {
            query.append_pair("sid", sid);
        }
    }

    let secure = matches!(url.scheme(), "https" | "wss");
    let scheme = match (transport, secure) {
        ("websocket", true) => "wss",
        ("websocket", false) => "ws",
        (_, true) => "https",
        (_, false) => "http",
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| RealtimeError::Protocol(format!("cannot switch endpoint to {scheme}")))?;
    }
    Ok(url)
}

/// A live Engine.IO session.
struct Engine {
    leftover: Vec<EnginePacket>,
    ping_window: Duration,
    input_rx: mpsc::Receiver<EngineInput>,
    output_tx: mpsc::Sender<EnginePacket>,
    reader_cancel: CancellationToken,
}

async fn run_session(
    http: reqwest::Client,
    options: TransportOptions,
    request: OpenRequest,
    outbound_rx: mpsc::Receiver<Outbound>,
    inbound_tx: mpsc::Sender<TransportEvent>,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => return,
        r = open_engine(&http, &options, &request, &cancel) => r,
    };

    let mut engine = match opened {
        Ok(e) => e,
        Err(e) => {
            warn!(endpoint = %request.endpoint, error = %e, "failed to open engine");
            let _ = inbound_tx.send(TransportEvent::OpenError(e.to_string())).await;
            return;
        }
    };

    let last = drive(&mut engine, &request, outbound_rx, &inbound_tx, &connected, &cancel).await;

    connected.store(false, Ordering::Relaxed);
    engine.reader_cancel.cancel();
    debug!(event = ?last, "socket session ended");
    let _ = inbound_tx.send(last).await;
}

async fn open_engine(
    http: &reqwest::Client,
    options: &TransportOptions,
    request: &OpenRequest,
    cancel: &CancellationToken,
) -> Result<Engine, RealtimeError> {
    let url = engine_url(&request.endpoint, &options.path, "polling", None)?;
    let (handshake, leftover) = polling::handshake(http, &url).await?;
    debug!(
        sid = %handshake.sid,
        upgrades = ?handshake.upgrades,
        ping_interval = handshake.ping_interval,
        "engine handshake complete"
    );

    let (input_tx, input_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (output_tx, output_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let reader_cancel = cancel.child_token();

    let mut upgraded = None;
    if options.upgrade && handshake.offers_websocket() {
        let ws_url = engine_url(
            &request.endpoint,
            &options.path,
            "websocket",
            Some(&handshake.sid),
        )?;
        match websocket::upgrade(&ws_url, options.probe_timeout).await {
            Ok(ws) => upgraded = Some(ws),
            Err(e) => warn!(error = %e, "WebSocket upgrade failed, staying on long-polling"),
        }
    }

    let kind = match upgraded {
        Some(ws) => {
            websocket::spawn(ws, input_tx, output_rx, reader_cancel.clone(), cancel.clone());
            "websocket"
        }
        None => {
            let poll_url = engine_url(
                &request.endpoint,
                &options.path,
                "polling",
                Some(&handshake.sid),
            )?;
            polling::spawn(
                http.clone(),
                poll_url,
                input_tx,
                output_rx,
                reader_cancel.clone(),
                cancel.clone(),
            );
            "polling"
        }
    };
    info!(sid = %handshake.sid, transport = kind, "engine open");

    Ok(Engine {
        leftover,
        ping_window: handshake.ping_window(),
        input_rx,
        output_tx,
        reader_cancel,
    })
}

/// Runs the Socket.IO session until it ends; returns the final event.
async fn drive(
    engine: &mut Engine,
    request: &OpenRequest,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    inbound_tx: &mpsc::Sender<TransportEvent>,
    connected: &AtomicBool,
    cancel: &CancellationToken,
) -> TransportEvent {
    let auth = request.auth_token.as_ref().map(|t| json!({ "token": t }));
    if let Err(e) = send_socket(&engine.output_tx, &SocketPacket::connect(auth)).await {
        return TransportEvent::OpenError(e.to_string());
    }

    let mut session = SocketSession {
        output: &engine.output_tx,
        inbound: inbound_tx,
        connected,
        opened: false,
    };

    for packet in std::mem::take(&mut engine.leftover) {
        if let Some(end) = session.on_packet(packet).await {
            return end;
        }
    }

    let ping_window = engine.ping_window;
    let deadline = tokio::time::sleep(ping_window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return session.closed(DisconnectReason::ClientDisconnect),

            () = &mut deadline => {
                warn!("no traffic within the ping window, closing");
                return session.closed(DisconnectReason::PingTimeout);
            }

            cmd = outbound_rx.recv() => {
                match cmd {
                    Some(Outbound::Emit { event, payload }) => {
                        trace!(%event, "emit");
                        if let Err(e) = send_socket(session.output, &SocketPacket::event(event, payload)).await {
                            warn!(error = %e, "failed to queue emit");
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = send_socket(session.output, &SocketPacket::disconnect()).await;
                        let _ = session.output.send(EnginePacket::Close).await;
                        return session.closed(DisconnectReason::ClientDisconnect);
                    }
                }
            }

            input = engine.input_rx.recv() => {
                match input {
                    Some(EngineInput::Packet(packet)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + ping_window);
                        if let Some(end) = session.on_packet(packet).await {
                            return end;
                        }
                    }
                    Some(EngineInput::Closed(reason)) => return session.closed(reason),
                    None => return session.closed(DisconnectReason::TransportClose),
                }
            }
        }
    }
}

/// Socket.IO state layered over an engine session.
struct SocketSession<'a> {
    output: &'a mpsc::Sender<EnginePacket>,
    inbound: &'a mpsc::Sender<TransportEvent>,
    connected: &'a AtomicBool,
    opened: bool,
}

impl SocketSession<'_> {
    /// Handles one engine packet; returns the final event if the session ended.
    async fn on_packet(&mut self, packet: EnginePacket) -> Option<TransportEvent> {
        match packet {
            EnginePacket::Ping(data) => {
                let _ = self.output.send(EnginePacket::Pong(data)).await;
                None
            }
            EnginePacket::Message(body) => self.on_message(&body).await,
            EnginePacket::Close => Some(self.closed(DisconnectReason::TransportClose)),
            EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => None,
        }
    }

    async fn on_message(&mut self, body: &str) -> Option<TransportEvent> {
        let packet = match SocketPacket::decode(body) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping undecodable socket packet");
                return None;
            }
        };
        if packet.namespace() != DEFAULT_NAMESPACE {
            debug!(namespace = packet.namespace(), "ignoring packet for another namespace");
            return None;
        }

        match packet {
            SocketPacket::Connect { data, .. } => {
                let socket_id = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.opened = true;
                self.connected.store(true, Ordering::Relaxed);
                let _ = self.inbound.send(TransportEvent::Open { socket_id }).await;
                None
            }
            SocketPacket::ConnectError { data, .. } => {
                let message = data
                    .as_ref()
                    .and_then(|d| d.get("message").and_then(Value::as_str).or_else(|| d.as_str()))
                    .unwrap_or("connection refused")
                    .to_string();
                Some(TransportEvent::OpenError(message))
            }
            SocketPacket::Disconnect { .. } => Some(self.closed(DisconnectReason::ServerDisconnect)),
            SocketPacket::Event { name, args, .. } => {
                let payload = args.into_iter().next().unwrap_or(Value::Null);
                if self.inbound.send(TransportEvent::Event { name, payload }).await.is_err() {
                    return Some(self.closed(DisconnectReason::ClientDisconnect));
                }
                None
            }
            SocketPacket::Ack { id, .. } => {
                trace!(id, "ignoring ack");
                None
            }
        }
    }

    /// Final event for a session ending with `reason`.
    ///
    /// Before the CONNECT ack arrives every close counts as an open failure.
    fn closed(&self, reason: DisconnectReason) -> TransportEvent {
        if self.opened {
            TransportEvent::Disconnect(reason)
        } else {
            TransportEvent::OpenError(format!("closed during handshake: {reason}"))
        }
    }
}

async fn send_socket(
    output: &mpsc::Sender<EnginePacket>,
    packet: &SocketPacket,
) -> Result<(), RealtimeError> {
    let body = packet.encode()?;
    output
        .send(EnginePacket::Message(body))
        .await
        .map_err(|_| RealtimeError::Transport("engine closed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_url_for_polling() {
        let url = engine_url("https://api.example.com", DEFAULT_PATH, "polling", None).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/socket.io/?EIO=4&transport=polling"
        );
    }

    #[test]
    fn engine_url_for_websocket_switches_scheme() {
        let url = engine_url("https://api.example.com/", "/socket.io/", "websocket", Some("abc"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.example.com/socket.io/?EIO=4&transport=websocket&sid=abc"
        );

        let url = engine_url("http://localhost:4000", DEFAULT_PATH, "websocket", None).unwrap();
        assert_eq!(url.scheme(), "ws");
    }

    #[test]
    fn engine_url_keeps_base_path() {
        let url = engine_url("http://localhost:4000/realtime", DEFAULT_PATH, "polling", None)
            .unwrap();
        assert_eq!(url.path(), "/realtime/socket.io/");
    }

    #[test]
    fn engine_url_rejects_garbage() {
        assert!(matches!(
            engine_url("not a url", DEFAULT_PATH, "polling", None),
            Err(RealtimeError::Url(_))
        ));
    }

    struct Harness {
        output_rx: mpsc::Receiver<EnginePacket>,
        inbound_rx: mpsc::Receiver<TransportEvent>,
        output_tx: mpsc::Sender<EnginePacket>,
        inbound_tx: mpsc::Sender<TransportEvent>,
        connected: AtomicBool,
    }

    impl Harness {
        fn new() -> Self {
            let (output_tx, output_rx) = mpsc::channel(16);
            let (inbound_tx, inbound_rx) = mpsc::channel(16);
            Self {
                output_rx,
                inbound_rx,
                output_tx,
                inbound_tx,
                connected: AtomicBool::new(false),
            }
        }

        fn session(&self) -> SocketSession<'_> {
            SocketSession {
                output: &self.output_tx,
                inbound: &self.inbound_tx,
                connected: &self.connected,
                opened: false,
            }
        }
    }

    #[tokio::test]
    async fn connect_ack_opens_session() {
        let mut h = Harness::new();
        let mut session = h.session();
        let end = session
            .on_packet(EnginePacket::Message(r#"0{"sid":"sock-1"}"#.into()))
            .await;
        assert!(end.is_none());
        assert!(session.opened);
        drop(session);

        assert!(h.connected.load(Ordering::Relaxed));
        assert_eq!(
            h.inbound_rx.recv().await.unwrap(),
            TransportEvent::Open {
                socket_id: "sock-1".into()
            }
        );
    }

    #[tokio::test]
    async fn engine_ping_is_answered() {
        let mut h = Harness::new();
        let mut session = h.session();
        assert!(session.on_packet(EnginePacket::Ping(None)).await.is_none());
        drop(session);
        assert_eq!(h.output_rx.recv().await.unwrap(), EnginePacket::Pong(None));
    }

    #[tokio::test]
    async fn connect_error_ends_with_open_error() {
        let h = Harness::new();
        let mut session = h.session();
        let end = session
            .on_packet(EnginePacket::Message(r#"4{"message":"invalid token"}"#.into()))
            .await;
        assert_eq!(end, Some(TransportEvent::OpenError("invalid token".into())));
    }

    #[tokio::test]
    async fn server_disconnect_after_open_is_voluntary() {
        let h = Harness::new();
        let mut session = h.session();
        session.opened = true;
        let end = session.on_packet(EnginePacket::Message("1".into())).await;
        assert_eq!(
            end,
            Some(TransportEvent::Disconnect(DisconnectReason::ServerDisconnect))
        );
    }

    #[tokio::test]
    async fn engine_close_before_open_is_open_error() {
        let h = Harness::new();
        let mut session = h.session();
        let end = session.on_packet(EnginePacket::Close).await;
        assert!(matches!(end, Some(TransportEvent::OpenError(_))));
    }

    #[tokio::test]
    async fn events_are_forwarded_with_first_argument() {
        let mut h = Harness::new();
        let mut session = h.session();
        session.opened = true;
        let end = session
            .on_packet(EnginePacket::Message(
                r#"2["casinoOdds",{"room":"teen20"},"extra"]"#.into(),
            ))
            .await;
        assert!(end.is_none());
        drop(session);
        assert_eq!(
            h.inbound_rx.recv().await.unwrap(),
            TransportEvent::Event {
                name: "casinoOdds".into(),
                payload: json!({"room": "teen20"}),
            }
        );
    }

    #[tokio::test]
    async fn other_namespaces_are_ignored() {
        let mut h = Harness::new();
        let mut session = h.session();
        session.opened = true;

        let end = session.on_packet(EnginePacket::Message("1/admin,".into())).await;
        assert!(end.is_none());
        let end = session
            .on_packet(EnginePacket::Message(
                r#"2/admin,["casinoOdds",{"room":"teen20"}]"#.into(),
            ))
            .await;
        assert!(end.is_none());
        drop(session);
        assert!(h.inbound_rx.try_recv().is_err());
    }
}
