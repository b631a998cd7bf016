//! Human-in-the-loop confirmation handshake.
//!
//! A worker registers an action id, publishes it to a human, then blocks in
//! [`ConfirmationTransport::await_decision`] until someone calls `approve`
//! or `reject`, or the timeout fires. Each registration carries exactly one
//! decision: the first `approve`/`reject` wins and later ones return `false`.
//!
//! [`InProcessConfirmations`] keeps pending records in memory and only works
//! when the approving caller shares the worker's process. Deployments where
//! approvals arrive on another instance need a durable transport such as
//! the SQLite one in `reagent-store`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::ConfirmationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationDecision {
    Approved,
    Rejected,
    Timeout,
}

#[async_trait]
pub trait ConfirmationTransport: Send + Sync {
    /// Open a pending confirmation for `action_id`.
    async fn register(&self, action_id: &str) -> std::result::Result<(), ConfirmationError>;

    /// Block until a decision arrives or `timeout` elapses.
    ///
    /// Never fails: transport problems resolve to `Rejected`, an elapsed
    /// timeout to `Timeout`. The pending record is removed either way.
    async fn await_decision(&self, action_id: &str, timeout: Duration) -> ConfirmationDecision;

    /// Approve a pending action. Returns `false` if nothing was pending.
    async fn approve(&self, action_id: &str) -> bool;

    /// Reject a pending action. Returns `false` if nothing was pending.
    async fn reject(&self, action_id: &str) -> bool;
}

struct Pending {
    sender: Option<oneshot::Sender<bool>>,
    receiver: Option<oneshot::Receiver<bool>>,
}

/// Single-process confirmation transport backed by oneshot channels.
#[derive(Default)]
pub struct InProcessConfirmations {
    pending: Mutex<HashMap<String, Pending>>,
}

impl InProcessConfirmations {
    pub fn new() -> Self {
        Self::default()
    }

    fn decide(&self, action_id: &str, approved: bool) -> bool {
        let sender = {
            let Ok(mut pending) = self.pending.lock() else {
                return false;
            };
            pending.get_mut(action_id).and_then(|p| p.sender.take())
        };
        match sender {
            Some(tx) => {
                let delivered = tx.send(approved).is_ok();
                debug!(action_id, approved, delivered, "Confirmation decision submitted");
                delivered
            }
            None => {
                warn!(action_id, "No pending confirmation to decide");
                false
            }
        }
    }

    /// Number of confirmations still waiting for a decision.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConfirmationTransport for InProcessConfirmations {
    async fn register(&self, action_id: &str) -> std::result::Result<(), ConfirmationError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| ConfirmationError::Transport(e.to_string()))?;
        if pending.contains_key(action_id) {
            return Err(ConfirmationError::AlreadyPending(action_id.to_string()));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(
            action_id.to_string(),
            Pending {
                sender: Some(tx),
                receiver: Some(rx),
            },
        );
        debug!(action_id, "Confirmation registered");
        Ok(())
    }

    async fn await_decision(&self, action_id: &str, timeout: Duration) -> ConfirmationDecision {
        let receiver = match self.pending.lock() {
            Ok(mut pending) => pending.get_mut(action_id).and_then(|p| p.receiver.take()),
            Err(_) => None,
        };
        let Some(rx) = receiver else {
            warn!(action_id, "Awaiting an unregistered confirmation");
            return ConfirmationDecision::Rejected;
        };

        let decision = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(true)) => ConfirmationDecision::Approved,
            Ok(Ok(false)) | Ok(Err(_)) => ConfirmationDecision::Rejected,
            Err(_) => ConfirmationDecision::Timeout,
        };

        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(action_id);
        }
        debug!(action_id, ?decision, "Confirmation resolved");
        decision
    }

    async fn approve(&self, action_id: &str) -> bool {
        self.decide(action_id, true)
    }

    async fn reject(&self, action_id: &str) -> bool {
        self.decide(action_id, false)
    }
}
