//! Cross-process confirmation queue.
//!
//! A row moves through `decision IS NULL` → `APPROVED | REJECTED | TIMEOUT`
//! exactly once: every writer uses a conditional `UPDATE … WHERE decision IS
//! NULL` and only the one that changes a row wins. The waiting worker deletes
//! the row after reading the decision.

use async_trait::async_trait;
use reagent_core::confirmation::{ConfirmationDecision, ConfirmationTransport};
use reagent_core::error::ConfirmationError;
use sqlx::Row;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::sqlite::{SqliteStore, now_timestamp, timestamp_after};

const APPROVED: &str = "APPROVED";
const REJECTED: &str = "REJECTED";
const TIMEOUT: &str = "TIMEOUT";

fn parse_decision(value: &str) -> ConfirmationDecision {
    match value {
        APPROVED => ConfirmationDecision::Approved,
        TIMEOUT => ConfirmationDecision::Timeout,
        _ => ConfirmationDecision::Rejected,
    }
}

enum Poll {
    Pending,
    Decided(ConfirmationDecision),
    Missing,
}

impl SqliteStore {
    async fn decide(&self, action_id: &str, decision: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE confirmations SET decision = ?1
             WHERE action_id = ?2 AND decision IS NULL AND expires_at > ?3",
        )
        .bind(decision)
        .bind(action_id)
        .bind(now_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn poll_decision(&self, action_id: &str) -> Result<Poll, sqlx::Error> {
        let row = sqlx::query("SELECT decision FROM confirmations WHERE action_id = ?1")
            .bind(action_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(Poll::Missing);
        };
        let decision: Option<String> = row.try_get("decision")?;
        Ok(match decision {
            Some(d) => Poll::Decided(parse_decision(&d)),
            None => Poll::Pending,
        })
    }

    async fn consume(&self, action_id: &str) {
        if let Err(e) = sqlx::query("DELETE FROM confirmations WHERE action_id = ?1")
            .bind(action_id)
            .execute(&self.pool)
            .await
        {
            warn!(action_id, error = %e, "Failed to remove confirmation row");
        }
    }

    /// Claim the row for the waiting worker once the deadline passes.
    /// An approve or reject that landed first still wins.
    async fn expire(&self, action_id: &str) -> ConfirmationDecision {
        match self.decide(action_id, TIMEOUT).await {
            Ok(true) => ConfirmationDecision::Timeout,
            Ok(false) => match self.poll_decision(action_id).await {
                Ok(Poll::Decided(decision)) => decision,
                Ok(_) => ConfirmationDecision::Timeout,
                Err(e) => {
                    warn!(action_id, error = %e, "Confirmation lookup failed at deadline");
                    ConfirmationDecision::Rejected
                }
            },
            Err(e) => {
                warn!(action_id, error = %e, "Failed to mark confirmation as timed out");
                ConfirmationDecision::Rejected
            }
        }
    }
}

#[async_trait]
impl ConfirmationTransport for SqliteStore {
    async fn register(&self, action_id: &str) -> Result<(), ConfirmationError> {
        if let Err(e) = self.purge_expired().await {
            warn!(error = %e, "Could not purge expired confirmations");
        }

        let result = sqlx::query(
            "INSERT INTO confirmations (action_id, decision, created_at, expires_at)
             VALUES (?1, NULL, ?2, ?3)
             ON CONFLICT(action_id) DO NOTHING",
        )
        .bind(action_id)
        .bind(now_timestamp())
        .bind(timestamp_after(self.confirmation_expiry))
        .execute(&self.pool)
        .await
        .map_err(|e| ConfirmationError::Transport(format!("register failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(ConfirmationError::AlreadyPending(action_id.to_string()));
        }
        debug!(action_id, "Confirmation registered");
        Ok(())
    }

    async fn await_decision(&self, action_id: &str, timeout: Duration) -> ConfirmationDecision {
        let deadline = Instant::now() + timeout;

        let decision = loop {
            match self.poll_decision(action_id).await {
                Ok(Poll::Decided(decision)) => break decision,
                Ok(Poll::Missing) => {
                    warn!(action_id, "Confirmation row disappeared while waiting");
                    break ConfirmationDecision::Rejected;
                }
                Ok(Poll::Pending) => {}
                Err(e) => {
                    warn!(action_id, error = %e, "Confirmation poll failed");
                    break ConfirmationDecision::Rejected;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break self.expire(action_id).await;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        };

        self.consume(action_id).await;
        info!(action_id, ?decision, "Confirmation resolved");
        decision
    }

    async fn approve(&self, action_id: &str) -> bool {
        match self.decide(action_id, APPROVED).await {
            Ok(applied) => {
                if !applied {
                    warn!(action_id, "No pending confirmation to approve");
                }
                applied
            }
            Err(e) => {
                warn!(action_id, error = %e, "Approve failed");
                false
            }
        }
    }

    async fn reject(&self, action_id: &str) -> bool {
        match self.decide(action_id, REJECTED).await {
            Ok(applied) => {
                if !applied {
                    warn!(action_id, "No pending confirmation to reject");
                }
                applied
            }
            Err(e) => {
                warn!(action_id, error = %e, "Reject failed");
                false
            }
        }
    }
}
