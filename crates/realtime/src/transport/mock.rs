//! In-memory connector for driving the manager in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    Connector, DisconnectReason, INBOUND_CAPACITY, OUTBOUND_CAPACITY, OpenRequest, Outbound,
    TransportEvent, TransportLink,
};

/// Records every transport the manager opens.
#[derive(Default)]
pub(crate) struct MockConnector {
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockConnector {
    pub(crate) fn count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub(crate) fn peer(&self, index: usize) -> Arc<MockPeer> {
        self.peers.lock().unwrap()[index].clone()
    }

    pub(crate) fn last(&self) -> Arc<MockPeer> {
        self.peers.lock().unwrap().last().cloned().expect("no transport opened")
    }
}

impl Connector for MockConnector {
    fn open(&self, request: OpenRequest) -> TransportLink {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let connected = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        self.peers.lock().unwrap().push(Arc::new(MockPeer {
            request,
            outbound: Mutex::new(outbound_rx),
            inbound: inbound_tx,
            connected: connected.clone(),
            cancel: cancel.clone(),
        }));

        TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
            connected,
            cancel,
        }
    }
}

/// The far end of one mock transport.
pub(crate) struct MockPeer {
    pub(crate) request: OpenRequest,
    outbound: Mutex<mpsc::Receiver<Outbound>>,
    inbound: mpsc::Sender<TransportEvent>,
    pub(crate) connected: Arc<AtomicBool>,
    pub(crate) cancel: CancellationToken,
}

impl MockPeer {
    /// Completes the handshake.
    pub(crate) fn open(&self, socket_id: &str) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.inbound.try_send(TransportEvent::Open {
            socket_id: socket_id.into(),
        });
    }

    /// Fails the handshake.
    pub(crate) fn fail(&self, message: &str) {
        let _ = self.inbound.try_send(TransportEvent::OpenError(message.into()));
    }

    /// Pushes a server event.
    pub(crate) fn push(&self, name: &str, payload: Value) {
        let _ = self.inbound.try_send(TransportEvent::Event {
            name: name.into(),
            payload,
        });
    }

    /// Closes the transport after a successful open.
    pub(crate) fn drop_with(&self, reason: DisconnectReason) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.inbound.try_send(TransportEvent::Disconnect(reason));
    }

    /// Drains everything the manager queued so far.
    pub(crate) fn sent(&self) -> Vec<Outbound> {
        let mut rx = self.outbound.lock().unwrap();
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    /// Drains and returns `(event, payload)` pairs, skipping closes.
    pub(crate) fn emitted(&self) -> Vec<(String, Value)> {
        self.sent()
            .into_iter()
            .filter_map(|cmd| match cmd {
                Outbound::Emit { event, payload } => Some((event, payload)),
                Outbound::Close => None,
            })
            .collect()
    }
}
