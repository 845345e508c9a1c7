//! Action completion correlator.
//!
//! A caller registers an action id before issuing the command that will
//! eventually complete it, then awaits the completion. The hub thread
//! resolves the waiter by sending the completion envelope through a oneshot
//! channel, which wakes the awaiting task exactly once without the hub
//! thread ever blocking.
//!
//! ```text
//! register("mine_1") ─► PendingAction { sender, receiver }
//!                            │                 │
//!   hub thread: on_event ────┘ send(env)       └─ wait(): timeout(receiver)
//! ```
//!
//! Completions for ids nobody registered are logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tessera_types::Envelope;
use tokio::sync::oneshot;

use crate::error::CorrelatorError;
use crate::hub::{EventHub, SubscriptionId, WILDCARD};

/// One outstanding action.
///
/// The sender is taken by the completion, the receiver by the waiter; the
/// entry is removed once both halves are gone.
struct PendingAction {
    generation: u64,
    sender: Option<oneshot::Sender<Envelope>>,
    receiver: Option<oneshot::Receiver<Envelope>>,
}

/// Routes action completions to their waiters.
#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<String, PendingAction>>,
    generation: AtomicU64,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Correlator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingAction>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribe [`on_event`](Self::on_event) to every envelope on `hub`.
    pub fn attach(self: &Arc<Self>, hub: &EventHub) -> SubscriptionId {
        let correlator = Arc::clone(self);
        hub.subscribe(WILDCARD, move |envelope| {
            if envelope.is_action_completion() {
                correlator.on_event(envelope);
            }
        })
    }

    /// Register `action_id` as pending.
    ///
    /// Re-registering an id that is still pending replaces it; a task
    /// already waiting on the old registration observes
    /// [`CorrelatorError::Cancelled`].
    pub fn register(&self, action_id: &str) {
        let (sender, receiver) = oneshot::channel();
        let entry = PendingAction {
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
            sender: Some(sender),
            receiver: Some(receiver),
        };
        if self.lock().insert(action_id.to_owned(), entry).is_some() {
            tracing::warn!(action_id, "Action re-registered; previous waiter cancelled");
        } else {
            tracing::debug!(action_id, "Action registered");
        }
    }

    /// Resolve the waiter for the envelope's `action_id`.
    ///
    /// Envelopes without an `action_id` are ignored. Unknown ids and
    /// repeated completions are logged and dropped.
    pub fn on_event(&self, envelope: &Envelope) {
        let Some(action_id) = envelope.action_id.as_deref() else {
            return;
        };

        let sender = {
            let mut pending = self.lock();
            let Some(entry) = pending.get_mut(action_id) else {
                tracing::warn!(
                    action_id,
                    event_type = %envelope.event_type,
                    "Completion for unknown action dropped"
                );
                return;
            };
            let Some(sender) = entry.sender.take() else {
                tracing::warn!(action_id, "Duplicate completion dropped");
                return;
            };
            if entry.receiver.is_none() {
                pending.remove(action_id);
            }
            sender
        };

        if sender.send(envelope.clone()).is_err() {
            tracing::debug!(action_id, "Waiter gone before completion arrived");
        } else {
            tracing::debug!(action_id, "Action completed");
        }
    }

    /// Wait for the completion of `action_id`.
    ///
    /// A completion that arrived before the call is returned immediately.
    /// Dropping the returned future before it resolves forgets the
    /// registration, as a timeout does.
    ///
    /// # Errors
    ///
    /// - [`CorrelatorError::NotRegistered`] if the id is unknown or already
    ///   being awaited.
    /// - [`CorrelatorError::Timeout`] if nothing arrives within `timeout`;
    ///   the pending action is removed.
    /// - [`CorrelatorError::Cancelled`] if the id was re-registered meanwhile.
    pub async fn wait(
        &self,
        action_id: &str,
        timeout: Duration,
    ) -> Result<Envelope, CorrelatorError> {
        let (generation, receiver) = {
            let mut pending = self.lock();
            let taken = pending.get_mut(action_id).and_then(|entry| {
                let completed = entry.sender.is_none();
                entry
                    .receiver
                    .take()
                    .map(|rx| (entry.generation, rx, completed))
            });
            let Some((generation, receiver, completed)) = taken else {
                return Err(CorrelatorError::NotRegistered {
                    action_id: action_id.to_owned(),
                });
            };
            if completed {
                pending.remove(action_id);
            }
            (generation, receiver)
        };
        let _guard = WaitGuard {
            correlator: self,
            action_id,
            generation,
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_closed)) => Err(CorrelatorError::Cancelled {
                action_id: action_id.to_owned(),
            }),
            Err(_elapsed) => {
                tracing::warn!(action_id, ?timeout, "Action timed out");
                Err(CorrelatorError::Timeout {
                    action_id: action_id.to_owned(),
                    timeout,
                })
            }
        }
    }

    /// Remove `action_id` if it still belongs to `generation`.
    fn forget(&self, action_id: &str, generation: u64) -> bool {
        let mut pending = self.lock();
        let current = pending
            .get(action_id)
            .is_some_and(|entry| entry.generation == generation);
        if current {
            pending.remove(action_id);
        }
        current
    }

    /// Number of outstanding actions.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Whether `action_id` is outstanding.
    pub fn is_pending(&self, action_id: &str) -> bool {
        self.lock().contains_key(action_id)
    }

    /// Drop every outstanding action. Active waiters observe `Cancelled`.
    pub fn clear(&self) {
        let dropped = {
            let mut pending = self.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            tracing::info!(dropped, "Cleared pending actions");
        }
    }
}

/// Held by an active [`Correlator::wait`]. Removes the waiter's own
/// registration when the wait ends, however it ends.
struct WaitGuard<'a> {
    correlator: &'a Correlator,
    action_id: &'a str,
    generation: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.correlator.forget(self.action_id, self.generation) {
            tracing::debug!(action_id = self.action_id, "Abandoned action removed");
        }
    }
}
