use async_trait::async_trait;
use sqlx::PgPool;

use wakeline_core::{SettlementJournal, StoreResult};

/// Durable processed-event ledger backing webhook idempotency.
pub struct PgSettlementJournal {
    pool: PgPool,
}

impl PgSettlementJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettlementJournal for PgSettlementJournal {
    async fn is_processed(&self, event_id: &str) -> StoreResult<bool> {
        let processed: Option<bool> = sqlx::query_scalar(
            "SELECT processed FROM webhook_events WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(processed.unwrap_or(false))
    }

    async fn mark_processed(&self, event_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, processed, processed_at)
            VALUES ($1, TRUE, NOW())
            ON CONFLICT (event_id)
            DO UPDATE SET processed = TRUE, processed_at = NOW()
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
