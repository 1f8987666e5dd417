//! PostgreSQL memory log. The table is created lazily on first use.

use super::{MemoryRecord, MemoryStore};
use crate::error::OrchestrationError;
use crate::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub struct PostgresMemoryStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresMemoryStore {
    /// Builds a lazy pool; nothing connects until the first query.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)
            .map_err(|e| OrchestrationError::ConfigurationError(format!("invalid database url: {}", e)))?;

        info!("Agent memory backend: postgres");
        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS agent_memory (
                      seq BIGSERIAL PRIMARY KEY,
                      run_id UUID NOT NULL,
                      ticker TEXT NOT NULL,
                      recommendations JSONB NOT NULL,
                      gaps JSONB NOT NULL,
                      completeness DOUBLE PRECISION NOT NULL,
                      confidence DOUBLE PRECISION NOT NULL,
                      data_quality DOUBLE PRECISION NOT NULL,
                      recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::MemoryUnavailable(format!("Failed to initialize agent memory schema: {}", e))
            })?;

        Ok(())
    }
}

fn string_list(column: &str, value: serde_json::Value) -> std::result::Result<Vec<String>, String> {
    serde_json::from_value(value).map_err(|e| format!("{} is not a list of strings: {}", column, e))
}

fn decode_row(row: &PgRow) -> std::result::Result<MemoryRecord, String> {
    let column = |e: sqlx::Error| e.to_string();
    Ok(MemoryRecord {
        run_id: row.try_get("run_id").map_err(column)?,
        ticker: row.try_get("ticker").map_err(column)?,
        recorded_at: row.try_get("recorded_at").map_err(column)?,
        recommendations: string_list("recommendations", row.try_get("recommendations").map_err(column)?)?,
        gaps: string_list("gaps", row.try_get("gaps").map_err(column)?)?,
        completeness: row.try_get("completeness").map_err(column)?,
        confidence: row.try_get("confidence").map_err(column)?,
        data_quality: row.try_get("data_quality").map_err(column)?,
    })
}

#[async_trait]
impl MemoryStore for PostgresMemoryStore {
    async fn append(&self, record: &MemoryRecord) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO agent_memory
              (run_id, ticker, recommendations, gaps, completeness, confidence, data_quality, recorded_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.run_id)
        .bind(&record.ticker)
        .bind(serde_json::to_value(&record.recommendations)?)
        .bind(serde_json::to_value(&record.gaps)?)
        .bind(record.completeness)
        .bind(record.confidence)
        .bind(record.data_quality)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| OrchestrationError::MemoryUnavailable(format!("Failed to append memory record: {}", e)))?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<MemoryRecord>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT run_id, ticker, recommendations, gaps, completeness, confidence, data_quality, recorded_at
            FROM agent_memory
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OrchestrationError::MemoryUnavailable(format!("Failed to load agent memory: {}", e)))?;

        let mut records = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        for (position, row) in rows.iter().enumerate() {
            match decode_row(row) {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    warn!(row = position, error = %e, "Skipping undecodable memory row");
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, loaded = records.len(), "Agent memory partially unreadable");
        }

        Ok(records)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
