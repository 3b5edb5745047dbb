//! Postgres-backed chat history store
//!
//! One row per session; the transcript lives in a JSONB array so that a save
//! is a single upsert statement.

use super::{ensure_not_empty, ChatHistoryStore, StoreResult};
use crate::error::StoreError;
use crate::models::{Exchange, SaveOutcome, SessionId};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

pub struct PostgresChatHistoryStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresChatHistoryStore {
    /// Build a pool that connects on first use.
    pub fn connect_lazy(url: &str) -> Result<Self, sqlx::Error> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)?;

        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS chat_histories (
                      session_id TEXT PRIMARY KEY,
                      chat_history JSONB NOT NULL DEFAULT '[]'::jsonb,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                      updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| StoreError::backend("initialize schema for", e))?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ChatHistoryStore for PostgresChatHistoryStore {
    async fn save(
        &self,
        session_id: &SessionId,
        exchanges: Vec<Exchange>,
    ) -> StoreResult<SaveOutcome> {
        ensure_not_empty(session_id, &exchanges)?;
        self.ensure_schema().await?;

        // xmax is zero only for rows created by this statement
        let row = sqlx::query(
            r#"
            INSERT INTO chat_histories (session_id, chat_history)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO UPDATE
              SET chat_history = chat_histories.chat_history || EXCLUDED.chat_history,
                  updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(session_id.as_str())
        .bind(Json(&exchanges))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::backend("update/insert", e))?;

        let inserted: bool = row
            .try_get("inserted")
            .map_err(|e| StoreError::backend("update/insert", e))?;

        debug!(session_id = %session_id, inserted, count = exchanges.len(), "Saved exchanges");

        Ok(if inserted {
            SaveOutcome::Inserted
        } else {
            SaveOutcome::Updated
        })
    }

    async fn get(&self, session_id: &SessionId) -> StoreResult<Vec<Exchange>> {
        self.ensure_schema().await?;

        let row = sqlx::query("SELECT chat_history FROM chat_histories WHERE session_id = $1")
            .bind(session_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::backend("get", e))?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        let Json(history): Json<Vec<Exchange>> = row
            .try_get("chat_history")
            .map_err(|e| StoreError::backend("decode", e))?;

        Ok(history)
    }

    async fn delete(&self, session_id: &SessionId) -> StoreResult<()> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM chat_histories WHERE session_id = $1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend("delete", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }

    async fn delete_all(&self) -> StoreResult<u64> {
        self.ensure_schema().await?;

        let result = sqlx::query("DELETE FROM chat_histories")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::backend("delete whole", e))?;

        Ok(result.rows_affected())
    }
}
