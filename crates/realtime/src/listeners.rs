//! Typed listener registry.

use std::collections::HashMap;
use std::sync::Arc;

use oddsdesk_protocol::{EventKind, ServerEvent};

/// Callback invoked for every inbound event of one kind.
pub type Listener = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

/// At most one listener per [`EventKind`].
///
/// The first registration for a kind wins until it is removed or the
/// registry is cleared; later registrations are ignored.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: HashMap<EventKind, Listener>,
}

impl ListenerRegistry {
    /// Wires `listener` for `kind`. Returns `false` if the kind is already wired.
    pub(crate) fn register(&mut self, kind: EventKind, listener: Listener) -> bool {
        if self.listeners.contains_key(&kind) {
            return false;
        }
        self.listeners.insert(kind, listener);
        true
    }

    pub(crate) fn remove(&mut self, kind: EventKind) -> bool {
        self.listeners.remove(&kind).is_some()
    }

    pub(crate) fn get(&self, kind: EventKind) -> Option<Listener> {
        self.listeners.get(&kind).cloned()
    }

    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use oddsdesk_protocol::events::Notification;

    use super::*;

    fn counting(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = counter.clone();
        Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn notification() -> ServerEvent {
        ServerEvent::Notification(Notification {
            message: "hi".into(),
            level: None,
        })
    }

    #[test]
    fn first_registration_wins() {
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let mut registry = ListenerRegistry::default();

        assert!(registry.register(EventKind::Notification, counting(&a)));
        assert!(!registry.register(EventKind::Notification, counting(&b)));

        let listener = registry.get(EventKind::Notification).unwrap();
        listener(&notification());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn remove_allows_rewiring() {
        let a = Arc::new(AtomicUsize::new(0));
        let mut registry = ListenerRegistry::default();
        registry.register(EventKind::Pong, counting(&a));

        assert!(registry.remove(EventKind::Pong));
        assert!(!registry.remove(EventKind::Pong));
        assert!(registry.register(EventKind::Pong, counting(&a)));
    }

    #[test]
    fn clear_empties() {
        let a = Arc::new(AtomicUsize::new(0));
        let mut registry = ListenerRegistry::default();
        registry.register(EventKind::Pong, counting(&a));
        registry.register(EventKind::CasinoOdds, counting(&a));
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert_eq!(registry.len(), 0);
        assert!(registry.get(EventKind::Pong).is_none());
    }
}
