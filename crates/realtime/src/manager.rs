//! Connection manager for the console's real-time channel.
//!
//! Owns at most one session and one transport at a time, tracks the
//! connection state, replays room subscriptions after every (re)connect and
//! reconnects with linear backoff after unexpected drops.
//!
//! All state sits behind one `std::sync::Mutex` that is never held across an
//! `.await`; listeners and handlers are always invoked after it is released.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use oddsdesk_protocol::events::{ForceLogout, PeerLogin};
use oddsdesk_protocol::messages::{LogoutRequest, RoomRequest};
use oddsdesk_protocol::{ClientEvent, EventKind, ServerEvent, UserRole};

use crate::driver::{self, Origin};
use crate::error::RealtimeError;
use crate::listeners::ListenerRegistry;
use crate::observer::{EventObserver, TracingObserver};
use crate::rooms::{self, RoomSubscriptions};
use crate::token::TokenSource;
use crate::transport::{Connector, OpenRequest, Outbound, SocketIoConnector};
use crate::types::{
    ConnectionEvent, ConnectionState, ConnectionStatus, RealtimeConfig, Session, SessionEnd,
};

/// Called once when the backend forces this session out.
pub type ForcedLogoutHandler = Arc<dyn Fn(&ForceLogout) + Send + Sync>;

/// Called when another admin logs in to the console.
pub type PeerLoginHandler = Arc<dyn Fn(&PeerLogin) + Send + Sync>;

/// What a [`PendingConnect`] resolves to.
pub type ConnectResult = Result<bool, RealtimeError>;

/// Outcome of a [`ConnectionManager::connect`] call.
///
/// Resolves to `Ok(true)` once the handshake completes. Dropping it does not
/// abort the connection.
pub struct PendingConnect {
    rx: oneshot::Receiver<ConnectResult>,
}

impl Future for PendingConnect {
    type Output = ConnectResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(RealtimeError::Cancelled)))
    }
}

/// The transport currently owned by the manager.
pub(crate) struct ActiveTransport {
    pub(crate) generation: u64,
    pub(crate) outbound: mpsc::Sender<Outbound>,
    /// Set by the transport itself once its handshake completes.
    pub(crate) connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    /// Parent of every task bound to this transport (driver, heartbeat, replay).
    pub(crate) tasks: CancellationToken,
    pub(crate) pending: Option<oneshot::Sender<ConnectResult>>,
    pub(crate) opened: bool,
}

impl ActiveTransport {
    /// Queues a command. Returns `false` if the transport is gone or backed up.
    pub(crate) fn send(&self, cmd: Outbound) -> bool {
        match self.outbound.try_send(cmd) {
            Ok(()) => true,
            Err(e) => {
                warn!(generation = self.generation, error = %e, "outbound queue rejected command");
                false
            }
        }
    }

    /// Closes the transport and stops its tasks; returns the unresolved connect.
    fn shutdown(mut self) -> Option<oneshot::Sender<ConnectResult>> {
        self.tasks.cancel();
        let _ = self.outbound.try_send(Outbound::Close);
        if !self.opened {
            self.cancel.cancel();
        }
        self.pending.take()
    }
}

pub(crate) struct Inner {
    pub(crate) state: ConnectionState,
    pub(crate) session: Option<Session>,
    pub(crate) transport: Option<ActiveTransport>,
    /// Bumped for every transport opened; events from older ones are dropped.
    pub(crate) generation: u64,
    pub(crate) rooms: RoomSubscriptions,
    pub(crate) listeners: ListenerRegistry,
    pub(crate) attempts: u32,
    pub(crate) reconnect: Option<CancellationToken>,
    pub(crate) observer: Arc<dyn EventObserver>,
    pub(crate) forced_logout: Option<ForcedLogoutHandler>,
    pub(crate) peer_login: Option<PeerLoginHandler>,
}

impl Inner {
    pub(crate) fn current(&mut self, generation: u64) -> Option<&mut ActiveTransport> {
        self.transport
            .as_mut()
            .filter(|t| t.generation == generation)
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| t.generation == generation)
    }

    /// The transport, if its handshake completed.
    pub(crate) fn live(&self) -> Option<&ActiveTransport> {
        self.transport.as_ref().filter(|t| t.opened)
    }

    pub(crate) fn cancel_reconnect(&mut self) {
        if let Some(token) = self.reconnect.take() {
            token.cancel();
        }
    }

    /// Drops the transport and everything bound to it.
    pub(crate) fn drop_transport(&mut self) -> Option<oneshot::Sender<ConnectResult>> {
        self.rooms.reset_announced();
        self.transport.take().and_then(ActiveTransport::shutdown)
    }
}

pub(crate) struct Shared {
    pub(crate) config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenSource>,
    inner: Mutex<Inner>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn notify(&self, event: ConnectionEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            trace!(error = %e, "status event dropped");
        }
    }

    pub(crate) fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state == state {
            return;
        }
        debug!(from = ?inner.state, to = ?state, "connection state changed");
        inner.state = state;
        self.state_tx.send_replace(state);
        self.notify(ConnectionEvent::StateChanged(state));
    }

    /// Starts a new logical connection, replacing whatever existed.
    pub(crate) fn start(
        self: &Arc<Self>,
        user_id: String,
        user_role: UserRole,
        origin: Origin,
    ) -> PendingConnect {
        let mut inner = self.lock();
        self.begin(&mut inner, user_id, user_role, origin)
    }

    /// Lock-held body of [`start`](Self::start).
    pub(crate) fn begin(
        self: &Arc<Self>,
        inner: &mut Inner,
        user_id: String,
        user_role: UserRole,
        origin: Origin,
    ) -> PendingConnect {
        inner.cancel_reconnect();
        if let Some(prev) = inner.drop_transport() {
            let _ = prev.send(Err(RealtimeError::Superseded));
        }
        inner.listeners.clear();
        if origin == Origin::Caller {
            inner.attempts = 0;
        }

        let session = Session {
            user_id,
            user_role,
            auth_token: self.tokens.bearer_token(),
        };
        let link = self.connector.open(OpenRequest {
            endpoint: self.config.endpoint.clone(),
            auth_token: session.auth_token.clone(),
            user_id: session.user_id.clone(),
            user_role,
        });

        inner.generation += 1;
        let generation = inner.generation;
        let (tx, rx) = oneshot::channel();
        let tasks = CancellationToken::new();

        info!(
            user = %session.user_id,
            role = %session.user_role,
            generation,
            ?origin,
            "connecting"
        );

        inner.transport = Some(ActiveTransport {
            generation,
            outbound: link.outbound,
            connected: link.connected,
            cancel: link.cancel,
            tasks: tasks.clone(),
            pending: Some(tx),
            opened: false,
        });
        inner.session = Some(session);
        self.set_state(inner, ConnectionState::Connecting);

        tokio::spawn(driver::drive(
            self.clone(),
            generation,
            link.inbound,
            tasks,
            origin,
        ));

        PendingConnect { rx }
    }

    /// Tears down the session and its transport.
    pub(crate) fn end_session(
        &self,
        inner: &mut Inner,
        end: SessionEnd,
        logout_notice: bool,
    ) -> Option<oneshot::Sender<ConnectResult>> {
        let session = inner.session.take();
        if logout_notice
            && let (Some(session), Some(transport)) = (&session, &inner.transport)
        {
            transport.send(Outbound::client(
                ClientEvent::Logout,
                &LogoutRequest {
                    user_id: session.user_id.clone(),
                    user_role: session.user_role,
                },
            ));
        }

        inner.cancel_reconnect();
        let pending = inner.drop_transport();
        inner.listeners.clear();
        inner.attempts = 0;
        self.set_state(inner, ConnectionState::Disconnected);

        if let Some(session) = session {
            info!(user = %session.user_id, reason = ?end, "session ended");
            self.notify(ConnectionEvent::SessionEnded(end));
        }
        pending
    }
}

/// Handle to the real-time channel.
///
/// Cheap to clone; clones share one session. Methods that open a transport
/// must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Creates a manager speaking Socket.IO to `config.endpoint`.
    pub fn new(
        config: RealtimeConfig,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, RealtimeError> {
        let connector = SocketIoConnector::new(config.transport.clone())?;
        Ok(Self::with_connector(config, tokens, Arc::new(connector)))
    }

    /// Creates a manager over a custom transport.
    pub fn with_connector(
        config: RealtimeConfig,
        tokens: Arc<dyn TokenSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        let inner = Inner {
            state: ConnectionState::Disconnected,
            session: None,
            transport: None,
            generation: 0,
            rooms: RoomSubscriptions::default(),
            listeners: ListenerRegistry::default(),
            attempts: 0,
            reconnect: None,
            observer: Arc::new(TracingObserver),
            forced_logout: None,
            peer_login: None,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                tokens,
                inner: Mutex::new(inner),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                state_tx,
            }),
        }
    }

    /// Replaces the diagnostic tap applied to wired events.
    pub fn set_observer(&self, observer: Arc<dyn EventObserver>) {
        self.shared.lock().observer = observer;
    }

    /// Takes the status event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.shared
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Watches the connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Opens a session for the given identity.
    ///
    /// Any existing session is torn down first; a still-pending earlier
    /// connect resolves to [`RealtimeError::Superseded`]. The state is
    /// `Connecting` as soon as this returns.
    pub fn connect(&self, user_id: impl Into<String>, user_role: UserRole) -> PendingConnect {
        self.shared.start(user_id.into(), user_role, Origin::Caller)
    }

    /// Ends the session. Desired rooms are kept for the next `connect`.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        if let Some(pending) = self.shared.end_session(&mut inner, SessionEnd::Logout, true) {
            let _ = pending.send(Err(RealtimeError::Cancelled));
        }
    }

    /// Sends an event to the backend.
    ///
    /// When no transport is connected but a session exists, reconnects once
    /// and sends afterwards. Returns whether the event was queued; failures
    /// are logged, never returned.
    pub async fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> bool {
        let payload = match serde_json::to_value(data) {
            Ok(v) => v,
            Err(e) => {
                warn!(%event, error = %e, "cannot serialize payload, dropping emit");
                return false;
            }
        };
        let cmd = Outbound::Emit {
            event: event.to_string(),
            payload,
        };

        let retry = {
            let inner = self.shared.lock();
            if let Some(transport) = inner.live() {
                return transport.send(cmd);
            }
            match &inner.session {
                Some(session) if inner.state == ConnectionState::Connecting => {
                    debug!(%event, "handshake in flight, waiting before emit");
                    Some((session.user_id.clone(), session.user_role, false))
                }
                Some(session) => Some((session.user_id.clone(), session.user_role, true)),
                None => None,
            }
        };

        let Some((user_id, user_role, reconnect)) = retry else {
            warn!(%event, "no session, dropping emit");
            return false;
        };

        if reconnect {
            info!(%event, "not connected, reconnecting before emit");
            let origin = if self.reconnect_attempts() > 0 {
                Origin::Retry
            } else {
                Origin::Caller
            };
            if let Err(e) = self.shared.start(user_id, user_role, origin).await {
                warn!(%event, error = %e, "reconnect failed, dropping emit");
                return false;
            }
        } else {
            let mut state = self.watch_state();
            let settled = matches!(
                tokio::time::timeout(
                    self.shared.config.handshake_timeout,
                    state.wait_for(|s| *s != ConnectionState::Connecting),
                )
                .await,
                Ok(Ok(_))
            );
            if !settled {
                warn!(%event, "handshake did not settle, dropping emit");
                return false;
            }
        }

        let inner = self.shared.lock();
        match inner.live() {
            Some(transport) => transport.send(cmd),
            None => {
                warn!(%event, "still not connected, dropping emit");
                false
            }
        }
    }

    /// Wires `listener` for `kind`.
    ///
    /// Only the first listener per kind takes effect until [`off`](Self::off)
    /// or a new transport; later calls return `false` and are ignored.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> bool
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        let wired = self.shared.lock().listeners.register(kind, Arc::new(listener));
        if !wired {
            debug!(%kind, "listener already wired, ignoring");
        }
        wired
    }

    /// Removes the listener for `kind`.
    pub fn off(&self, kind: EventKind) -> bool {
        self.shared.lock().listeners.remove(kind)
    }

    /// Subscribes to a room, now if connected and on every later connect.
    pub fn join_room(&self, name: &str) -> Result<(), RealtimeError> {
        let room = rooms::canonicalize(name)?;
        let mut inner = self.shared.lock();
        inner.rooms.join(&room);

        let announced = inner.live().is_some_and(|t| {
            t.send(Outbound::client(
                ClientEvent::JoinRoom,
                &RoomRequest { room: room.clone() },
            ))
        });
        if announced {
            inner.rooms.mark_announced(&room);
        }
        debug!(%room, announced, "joined room");
        Ok(())
    }

    /// Unsubscribes from a room.
    pub fn leave_room(&self, name: &str) -> Result<(), RealtimeError> {
        let room = rooms::canonicalize(name)?;
        let mut inner = self.shared.lock();
        inner.rooms.leave(&room);

        let announced = inner.live().is_some_and(|t| {
            t.send(Outbound::client(
                ClientEvent::LeaveRoom,
                &RoomRequest { room: room.clone() },
            ))
        });
        debug!(%room, announced, "left room");
        Ok(())
    }

    /// Registers the callback run once when the backend forces this session
    /// out. Replaces any earlier handler.
    pub fn set_forced_logout_handler<F>(&self, handler: F)
    where
        F: Fn(&ForceLogout) + Send + Sync + 'static,
    {
        self.shared.lock().forced_logout = Some(Arc::new(handler));
    }

    /// Registers the callback run when another admin logs in.
    pub fn set_peer_login_handler<F>(&self, handler: F)
    where
        F: Fn(&PeerLogin) + Send + Sync + 'static,
    {
        self.shared.lock().peer_login = Some(Arc::new(handler));
    }

    /// Whether the handshake completed on the current transport.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// Snapshot of state, transport and session owner.
    pub fn status(&self) -> ConnectionStatus {
        let inner = self.shared.lock();
        ConnectionStatus {
            connected: inner.state == ConnectionState::Connected,
            connecting: inner.state == ConnectionState::Connecting,
            has_transport: inner.transport.is_some(),
            current_user: inner.session.as_ref().map(Session::user),
        }
    }

    /// Desired rooms, sorted.
    pub fn rooms(&self) -> Vec<String> {
        self.shared.lock().rooms.desired()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().attempts
    }

    /// Number of event kinds with a listener wired.
    pub fn listener_count(&self) -> usize {
        self.shared.lock().listeners.len()
    }
}
