//! Diagnostic tap over inbound domain events.

use oddsdesk_protocol::ServerEvent;
use tracing::debug;

/// Sees every inbound event for a wired kind before its listener does.
pub trait EventObserver: Send + Sync + 'static {
    fn observe(&self, event: &ServerEvent);
}

/// Default observer: logs each event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EventObserver for TracingObserver {
    fn observe(&self, event: &ServerEvent) {
        debug!(kind = %event.kind(), "inbound event");
    }
}

impl<F> EventObserver for F
where
    F: Fn(&ServerEvent) + Send + Sync + 'static,
{
    fn observe(&self, event: &ServerEvent) {
        self(event)
    }
}
