//! Reconnection after unexpected drops.
//!
//! Voluntary closes end the session (see [`DisconnectReason::is_voluntary`]);
//! everything else is retried with linear backoff until the attempt cap,
//! after which the session is dropped and the caller must connect again.
//!
//! [`DisconnectReason::is_voluntary`]: crate::transport::DisconnectReason::is_voluntary

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::Origin;
use crate::manager::{Inner, Shared};
use crate::types::{ConnectionEvent, ReconnectConfig, SessionEnd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    Exhausted { attempts: u32 },
}

/// Decides what follows a lost connection after `attempts` failed tries.
pub(crate) fn next_retry(config: &ReconnectConfig, attempts: u32) -> RetryDecision {
    if attempts >= config.max_attempts {
        return RetryDecision::Exhausted { attempts };
    }
    let attempt = attempts + 1;
    RetryDecision::Retry {
        attempt,
        delay: config.delay_for_attempt(attempt),
    }
}

impl Shared {
    /// Schedules the next attempt, or ends the session if none are left.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>, inner: &mut Inner) {
        match next_retry(&self.config.reconnect, inner.attempts) {
            RetryDecision::Retry { attempt, delay } => {
                inner.attempts = attempt;
                let cancel = CancellationToken::new();
                if let Some(prev) = inner.reconnect.replace(cancel.clone()) {
                    prev.cancel();
                }

                info!(
                    attempt,
                    max_attempts = self.config.reconnect.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "reconnecting"
                );
                self.notify(ConnectionEvent::Reconnecting { attempt, delay });
                tokio::spawn(reconnect_after(
                    self.clone(),
                    delay,
                    inner.generation,
                    cancel,
                ));
            }
            RetryDecision::Exhausted { attempts } => {
                warn!(attempts, "reconnect attempts exhausted, dropping session");
                self.end_session(inner, SessionEnd::RetriesExhausted { attempts }, false);
            }
        }
    }
}

/// Waits out the backoff, then reconnects with the stored identity.
///
/// Does nothing if anything replaced the session or transport meanwhile.
async fn reconnect_after(
    shared: Arc<Shared>,
    delay: Duration,
    generation: u64,
    cancel: CancellationToken,
) {
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("scheduled reconnect cancelled");
            return;
        }
        () = tokio::time::sleep(delay) => {}
    }

    let mut inner = shared.lock();
    if cancel.is_cancelled() || inner.generation != generation || inner.transport.is_some() {
        return;
    }
    let Some(session) = inner.session.clone() else {
        return;
    };
    inner.reconnect = None;

    // Failures surface through the driver, which keeps the schedule going.
    drop(shared.begin(&mut inner, session.user_id, session.user_role, Origin::Retry));
}
