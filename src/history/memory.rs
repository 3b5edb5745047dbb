//! In-memory chat history store for development and tests

use super::{ensure_not_empty, ChatHistoryStore, StoreResult};
use crate::error::StoreError;
use crate::models::{Exchange, SaveOutcome, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct InMemoryChatHistoryStore {
    transcripts: Arc<RwLock<HashMap<SessionId, Vec<Exchange>>>>,
}

impl InMemoryChatHistoryStore {
    pub fn new() -> Self {
        Self {
            transcripts: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryChatHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ChatHistoryStore for InMemoryChatHistoryStore {
    async fn save(
        &self,
        session_id: &SessionId,
        exchanges: Vec<Exchange>,
    ) -> StoreResult<SaveOutcome> {
        ensure_not_empty(session_id, &exchanges)?;

        let mut transcripts = self.transcripts.write().await;
        match transcripts.get_mut(session_id) {
            Some(existing) => {
                existing.extend(exchanges);
                Ok(SaveOutcome::Updated)
            }
            None => {
                transcripts.insert(session_id.clone(), exchanges);
                Ok(SaveOutcome::Inserted)
            }
        }
    }

    async fn get(&self, session_id: &SessionId) -> StoreResult<Vec<Exchange>> {
        let transcripts = self.transcripts.read().await;
        transcripts
            .get(session_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn delete(&self, session_id: &SessionId) -> StoreResult<()> {
        let mut transcripts = self.transcripts.write().await;
        transcripts
            .remove(session_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn delete_all(&self) -> StoreResult<u64> {
        let mut transcripts = self.transcripts.write().await;
        let removed = transcripts.len() as u64;
        transcripts.clear();
        Ok(removed)
    }
}
