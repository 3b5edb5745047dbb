//! Chat history persistence
//!
//! Session-keyed append log of conversation exchanges. At most one transcript
//! exists per session id; saves append, never reorder.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryChatHistoryStore;
pub use postgres::PostgresChatHistoryStore;

use crate::error::StoreError;
use crate::models::{Exchange, SaveOutcome, SessionId};
use std::sync::Arc;
use tracing::{info, warn};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Trait for transcript persistence. Every operation is one store round trip.
#[async_trait::async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// Create the transcript, or append `exchanges` to the existing one.
    async fn save(&self, session_id: &SessionId, exchanges: Vec<Exchange>)
        -> StoreResult<SaveOutcome>;

    /// Full ordered transcript for the session.
    async fn get(&self, session_id: &SessionId) -> StoreResult<Vec<Exchange>>;

    /// Remove one transcript. Missing transcripts are an error.
    async fn delete(&self, session_id: &SessionId) -> StoreResult<()>;

    /// Remove every transcript; returns how many were removed.
    async fn delete_all(&self) -> StoreResult<u64>;
}

/// Pick the store backend: Postgres when a connection string is configured,
/// in-memory otherwise.
pub fn build_store(database_url: Option<&str>) -> Arc<dyn ChatHistoryStore> {
    if let Some(url) = database_url {
        match PostgresChatHistoryStore::connect_lazy(url) {
            Ok(store) => {
                info!("Chat history backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres chat history backend, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Chat history backend: in-memory");
    Arc::new(InMemoryChatHistoryStore::new())
}

pub(crate) fn ensure_not_empty(session_id: &SessionId, exchanges: &[Exchange]) -> StoreResult<()> {
    if exchanges.is_empty() {
        return Err(StoreError::EmptyExchanges(session_id.to_string()));
    }
    Ok(())
}
