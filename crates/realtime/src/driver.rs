//! Per-transport event loop and the manager's reactions to it.
//!
//! Each transport gets one driver task. Every event it forwards is tagged
//! with the transport's generation; handlers ignore events whose generation
//! is no longer current, so nothing from a replaced transport can touch the
//! session that replaced it.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use oddsdesk_protocol::events::{ForceLogout, PeerLogin};
use oddsdesk_protocol::messages::{Heartbeat, LoginRequest, RoomRequest};
use oddsdesk_protocol::{ClientEvent, Inbound, ServerEvent};

use crate::error::RealtimeError;
use crate::manager::Shared;
use crate::pumps::heartbeat::heartbeat_pump;
use crate::transport::{DisconnectReason, Outbound, TransportEvent};
use crate::types::{ConnectionState, SessionEnd};

/// Who asked for a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// A caller; failures are returned, not retried.
    Caller,
    /// The backoff schedule; failures count as another lost attempt.
    Retry,
}

pub(crate) async fn drive(
    shared: Arc<Shared>,
    generation: u64,
    mut inbound: mpsc::Receiver<TransportEvent>,
    tasks: CancellationToken,
    origin: Origin,
) {
    let deadline = tokio::time::sleep(shared.config.handshake_timeout);
    tokio::pin!(deadline);
    let mut opened = false;

    loop {
        tokio::select! {
            biased;

            _ = tasks.cancelled() => {
                trace!(generation, "driver cancelled");
                return;
            }

            event = inbound.recv() => match event {
                Some(TransportEvent::Open { socket_id }) => {
                    opened = true;
                    shared.on_open(generation, socket_id);
                }
                Some(TransportEvent::OpenError(message)) => {
                    shared.on_open_failed(generation, RealtimeError::Transport(message), origin);
                    return;
                }
                Some(TransportEvent::Event { name, payload }) => {
                    shared.on_event(generation, &name, payload);
                }
                Some(TransportEvent::Disconnect(reason)) => {
                    shared.on_disconnect(generation, reason);
                    return;
                }
                None if opened => {
                    shared.on_disconnect(generation, DisconnectReason::TransportClose);
                    return;
                }
                None => {
                    let error = RealtimeError::Transport("transport closed during handshake".into());
                    shared.on_open_failed(generation, error, origin);
                    return;
                }
            },

            () = &mut deadline, if !opened => {
                if !shared.on_handshake_timeout(generation, origin) {
                    return;
                }
                opened = true;
            }
        }
    }
}

impl Shared {
    pub(crate) fn on_open(self: &Arc<Self>, generation: u64, socket_id: String) {
        let pending = {
            let mut inner = self.lock();
            let Some(session) = inner.session.clone() else {
                return;
            };
            let Some(transport) = inner.current(generation) else {
                debug!(generation, "ignoring open from stale transport");
                return;
            };
            if transport.opened {
                return;
            }
            transport.opened = true;

            transport.send(Outbound::client(
                ClientEvent::Login,
                &LoginRequest {
                    user_id: session.user_id.clone(),
                    user_role: session.user_role,
                    socket_id: socket_id.clone(),
                    timestamp: chrono::Utc::now().timestamp_millis(),
                },
            ));
            tokio::spawn(heartbeat_pump(
                transport.outbound.clone(),
                self.config.heartbeat_interval,
                transport.tasks.child_token(),
            ));
            tokio::spawn(replay_rooms_after(
                self.clone(),
                generation,
                self.config.room_replay_delay,
                transport.tasks.child_token(),
            ));
            let pending = transport.pending.take();

            inner.attempts = 0;
            self.set_state(&mut inner, ConnectionState::Connected);
            info!(user = %session.user_id, %socket_id, generation, "connected");
            pending
        };

        if let Some(tx) = pending {
            let _ = tx.send(Ok(true));
        }
    }

    /// Handles a missed handshake deadline. Returns `true` if the transport
    /// turned out to be open after all.
    pub(crate) fn on_handshake_timeout(self: &Arc<Self>, generation: u64, origin: Origin) -> bool {
        let late_open = {
            let inner = self.lock();
            match inner.transport.as_ref().filter(|t| t.generation == generation) {
                Some(t) => t.opened || t.connected.load(Ordering::SeqCst),
                None => return false,
            }
        };

        if late_open {
            warn!(generation, "open event missing but transport reports connected");
            self.on_open(generation, String::new());
            return true;
        }

        warn!(
            generation,
            timeout_ms = self.config.handshake_timeout.as_millis() as u64,
            "handshake timed out"
        );
        self.on_open_failed(generation, RealtimeError::Timeout, origin);
        false
    }

    /// The transport never opened. The session is kept.
    pub(crate) fn on_open_failed(self: &Arc<Self>, generation: u64, error: RealtimeError, origin: Origin) {
        let mut inner = self.lock();
        if !inner.is_current(generation) {
            return;
        }
        warn!(generation, error = %error, "connection attempt failed");

        let pending = inner.drop_transport();
        self.set_state(&mut inner, ConnectionState::Disconnected);
        if origin == Origin::Retry && inner.session.is_some() {
            self.schedule_reconnect(&mut inner);
        }

        if let Some(tx) = pending {
            let _ = tx.send(Err(error));
        }
    }

    pub(crate) fn on_disconnect(self: &Arc<Self>, generation: u64, reason: DisconnectReason) {
        let mut inner = self.lock();
        if !inner.is_current(generation) {
            debug!(generation, %reason, "ignoring disconnect from stale transport");
            return;
        }

        if let Some(tx) = inner.drop_transport() {
            let _ = tx.send(Err(RealtimeError::Transport(reason.to_string())));
        }

        if reason.is_voluntary() {
            info!(%reason, "channel closed on purpose, not reconnecting");
            self.end_session(&mut inner, SessionEnd::Closed(reason), false);
            return;
        }

        warn!(%reason, "connection lost");
        self.set_state(&mut inner, ConnectionState::Disconnected);
        if inner.session.is_some() {
            self.schedule_reconnect(&mut inner);
        }
    }

    pub(crate) fn on_event(self: &Arc<Self>, generation: u64, name: &str, payload: Value) {
        let inbound = match Inbound::decode(name, payload) {
            Ok(i) => i,
            Err(e) => {
                warn!(event = %name, error = %e, "dropping undecodable event");
                return;
            }
        };

        match inbound {
            Inbound::Event(event) => self.dispatch(generation, event),
            Inbound::ForceLogout(signal) => self.on_forced_logout(generation, signal),
            Inbound::PeerLogin(peer) => self.on_peer_login(generation, peer),
            Inbound::ServerPing(_) => {
                let inner = self.lock();
                if let Some(t) = inner.live().filter(|t| t.generation == generation) {
                    trace!("answering server ping");
                    t.send(Outbound::client(ClientEvent::Pong, &Heartbeat::now()));
                }
            }
            Inbound::Unknown(name) => debug!(event = %name, "no handler for event"),
        }
    }

    fn dispatch(&self, generation: u64, event: ServerEvent) {
        let kind = event.kind();
        let (listener, observer) = {
            let inner = self.lock();
            if !inner.is_current(generation) {
                return;
            }
            (inner.listeners.get(kind), inner.observer.clone())
        };

        let Some(listener) = listener else {
            trace!(%kind, "no listener wired");
            return;
        };
        observer.observe(&event);
        listener(&event);
    }

    /// Tears the session down without a logout notice, then tells the
    /// registered handler.
    fn on_forced_logout(&self, generation: u64, signal: ForceLogout) {
        let handler = {
            let mut inner = self.lock();
            if inner.session.is_none() {
                debug!("forced logout without a session, ignoring");
                return;
            }
            if !inner.is_current(generation) {
                warn!(
                    generation,
                    current = inner.generation,
                    "forced logout from a replaced transport, ignoring"
                );
                return;
            }

            warn!(message = ?signal.message, "forced logout");
            if let Some(tx) = self.end_session(&mut inner, SessionEnd::ForcedLogout, false) {
                let _ = tx.send(Err(RealtimeError::Cancelled));
            }
            inner.forced_logout.clone()
        };

        match handler {
            Some(handler) => handler(&signal),
            None => debug!("no forced logout handler registered"),
        }
    }

    fn on_peer_login(&self, generation: u64, peer: PeerLogin) {
        let handler = {
            let inner = self.lock();
            if !inner.is_current(generation) {
                return;
            }
            inner.peer_login.clone()
        };

        match handler {
            Some(handler) => handler(&peer),
            None => debug!(user = %peer.user_id, "peer admin logged in"),
        }
    }

    /// Announces every desired room the current transport has not seen yet.
    fn replay_rooms(&self, generation: u64) {
        let mut inner = self.lock();
        let rooms = inner.rooms.pending();
        let Some(transport) = inner.live().filter(|t| t.generation == generation) else {
            return;
        };

        let announced: Vec<String> = rooms
            .into_iter()
            .filter(|room| {
                transport.send(Outbound::client(
                    ClientEvent::JoinRoom,
                    &RoomRequest { room: room.clone() },
                ))
            })
            .collect();

        for room in &announced {
            inner.rooms.mark_announced(room);
        }
        if !announced.is_empty() {
            info!(rooms = ?announced, generation, "replayed room subscriptions");
        }
    }
}

async fn replay_rooms_after(
    shared: Arc<Shared>,
    generation: u64,
    delay: Duration,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => return,
        () = tokio::time::sleep(delay) => {}
    }
    shared.replay_rooms(generation);
}
