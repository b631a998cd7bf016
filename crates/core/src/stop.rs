//! Run-level stop requests keyed by request id.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Out-of-band cancellation. The loop polls it between iterations.
#[async_trait]
pub trait StopSignal: Send + Sync {
    /// Flag `request_id` for stopping. Returns `false` for an empty id.
    async fn request_stop(&self, request_id: &str) -> bool;

    async fn is_stop_requested(&self, request_id: &str) -> bool;

    async fn clear(&self, request_id: &str);
}

/// Process-local stop flags.
#[derive(Default)]
pub struct InMemoryStopRegistry {
    flags: Mutex<HashSet<String>>,
}

impl InMemoryStopRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StopSignal for InMemoryStopRegistry {
    async fn request_stop(&self, request_id: &str) -> bool {
        if request_id.is_empty() {
            warn!("Stop requested without a request id");
            return false;
        }
        match self.flags.lock() {
            Ok(mut flags) => {
                flags.insert(request_id.to_string());
                info!(request_id, "Stop flag set");
                true
            }
            Err(_) => false,
        }
    }

    async fn is_stop_requested(&self, request_id: &str) -> bool {
        if request_id.is_empty() {
            return false;
        }
        self.flags
            .lock()
            .map(|flags| flags.contains(request_id))
            .unwrap_or(false)
    }

    async fn clear(&self, request_id: &str) {
        if let Ok(mut flags) = self.flags.lock()
            && flags.remove(request_id)
        {
            debug!(request_id, "Stop flag cleared");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_check_clear() {
        let stops = InMemoryStopRegistry::new();
        assert!(!stops.is_stop_requested("r1").await);
        assert!(stops.request_stop("r1").await);
        assert!(stops.is_stop_requested("r1").await);
        stops.clear("r1").await;
        assert!(!stops.is_stop_requested("r1").await);
    }

    #[tokio::test]
    async fn empty_request_id_is_ignored() {
        let stops = InMemoryStopRegistry::new();
        assert!(!stops.request_stop("").await);
        assert!(!stops.is_stop_requested("").await);
    }
}
