//! Context persistence collaborator.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::context::AgentContext;
use crate::error::StoreError;
use crate::message::ConversationId;

#[async_trait]
pub trait ContextStore: Send + Sync {
    async fn save(&self, context: &AgentContext) -> std::result::Result<(), StoreError>;

    async fn load(&self, conversation_id: &ConversationId) -> std::result::Result<Option<AgentContext>, StoreError>;
}

/// Keeps the latest snapshot of each context in memory.
#[derive(Default)]
pub struct InMemoryContextStore {
    contexts: Mutex<HashMap<String, AgentContext>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn save(&self, context: &AgentContext) -> Result<(), StoreError> {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        contexts.insert(context.conversation_id.to_string(), context.clone());
        Ok(())
    }

    async fn load(&self, conversation_id: &ConversationId) -> Result<Option<AgentContext>, StoreError> {
        let contexts = self
            .contexts
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;
        Ok(contexts.get(conversation_id.as_str()).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_then_load() {
        let store = InMemoryContextStore::new();
        let mut ctx = AgentContext::new(ConversationId::from("c9"), "m");
        ctx.bump_iteration();
        store.save(&ctx).await.unwrap();

        let loaded = store.load(&ConversationId::from("c9")).await.unwrap().unwrap();
        assert_eq!(loaded.iterations(), 1);
        assert!(store.load(&ConversationId::from("nope")).await.unwrap().is_none());
    }
}
