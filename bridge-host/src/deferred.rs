//! Registrations that arrive before the host can reach the extension.
//!
//! The extension registers handlers from inside its `init`, which runs before
//! the host learns where the extension's callback endpoint is. Those
//! registrations wait here and are applied, in arrival order and exactly once,
//! when the reverse link is established.

use bridge_core::{BridgeError, BridgeResult, CallbackId, CallbackService};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// The host's handle on the extension's callback registry.
pub type Link = Arc<dyn CallbackService>;

/// Performs one real subscription once a link exists. Runs under the queue
/// lock, so it must not await or call the extension.
pub type RegisterFn = Box<dyn FnOnce(&Link) -> BridgeResult<()> + Send>;

/// What [`DeferredRegistrationQueue::enqueue_or_run`] did with a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The link was live; the registration was applied immediately.
    Ran,
    /// Queued behind `position` earlier registrations.
    Deferred { position: usize },
}

struct PendingRegistration {
    callback_id: CallbackId,
    register: RegisterFn,
    enqueued_at: DateTime<Utc>,
}

/// Outcome of a flush.
#[derive(Debug, Default)]
pub struct FlushReport {
    pub applied: Vec<CallbackId>,
    pub failed: Vec<(CallbackId, BridgeError)>,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.applied.len() + self.failed.len()
    }
}

#[derive(Default)]
struct QueueState {
    link: Option<Link>,
    pending: VecDeque<PendingRegistration>,
}

/// One mutex covers both the live-or-queue decision and the flush, so a
/// registration is never both queued and run, nor lost between the two.
#[derive(Default)]
pub struct DeferredRegistrationQueue {
    state: Mutex<QueueState>,
}

impl DeferredRegistrationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue_or_run(
        &self,
        callback_id: CallbackId,
        register: RegisterFn,
    ) -> BridgeResult<Enqueued> {
        let mut state = self.state.lock().await;
        match &state.link {
            Some(link) => {
                register(link)?;
                Ok(Enqueued::Ran)
            }
            None => {
                let position = state.pending.len();
                state.pending.push_back(PendingRegistration {
                    callback_id,
                    register,
                    enqueued_at: Utc::now(),
                });
                debug!(callback_id = %callback_id, position, "Deferred registration");
                Ok(Enqueued::Deferred { position })
            }
        }
    }

    /// Set the link and replay every queued registration in order.
    ///
    /// A failing registration is logged and skipped; the rest still apply.
    /// The link can be set only once.
    pub async fn establish(&self, link: Link) -> BridgeResult<FlushReport> {
        let mut state = self.state.lock().await;
        if state.link.is_some() {
            return Err(BridgeError::LinkAlreadyEstablished);
        }

        let mut report = FlushReport::default();
        while let Some(pending) = state.pending.pop_front() {
            let waited = Utc::now() - pending.enqueued_at;
            match (pending.register)(&link) {
                Ok(()) => {
                    debug!(
                        callback_id = %pending.callback_id,
                        waited_ms = waited.num_milliseconds(),
                        "Applied deferred registration"
                    );
                    report.applied.push(pending.callback_id);
                }
                Err(e) => {
                    error!(callback_id = %pending.callback_id, "Deferred registration failed: {}", e);
                    report.failed.push((pending.callback_id, e));
                }
            }
        }

        state.link = Some(link);
        info!(
            "Reverse link established; replayed {} registrations ({} failed)",
            report.total(),
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn is_live(&self) -> bool {
        self.state.lock().await.link.is_some()
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
