use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use super::{CreditCheck, CustomerRecord, JobRecord, NewJob, NodeRecord, Store, StoreError};

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects and applies pending migrations.
    pub async fn connect(url: &str) -> Result<Arc<Self>, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations applied");
        Ok(Arc::new(Self { pool }))
    }

    pub fn from_pool(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn find_node(&self, id: &str) -> Result<Option<NodeRecord>, StoreError> {
        let row = sqlx::query_as::<_, NodeRecord>(
            r#"
            SELECT id, ip_address, device_id, wallet_address, specs, status,
                   last_seen, tokens, benchmark_score
            FROM nodes
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn save_node(&self, node: NodeRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, ip_address, device_id, wallet_address, specs, status,
                               last_seen, tokens, benchmark_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                ip_address = EXCLUDED.ip_address,
                device_id = EXCLUDED.device_id,
                wallet_address = EXCLUDED.wallet_address,
                specs = EXCLUDED.specs,
                status = EXCLUDED.status,
                last_seen = EXCLUDED.last_seen,
                tokens = EXCLUDED.tokens,
                benchmark_score = EXCLUDED.benchmark_score
            "#,
        )
        .bind(&node.id)
        .bind(&node.ip_address)
        .bind(&node.device_id)
        .bind(&node.wallet_address)
        .bind(&node.specs)
        .bind(&node.status)
        .bind(node.last_seen)
        .bind(node.tokens)
        .bind(node.benchmark_score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_node(
        &self,
        id: &str,
        ip_address: &str,
        status: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO nodes (id, ip_address, status, last_seen)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                ip_address = EXCLUDED.ip_address,
                status = EXCLUDED.status,
                last_seen = EXCLUDED.last_seen
            "#,
        )
        .bind(id)
        .bind(ip_address)
        .bind(status)
        .bind(seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_node_tokens(&self, id: &str, delta: i64) -> Result<Option<i64>, StoreError> {
        let tokens: Option<i64> = sqlx::query_scalar(
            r#"UPDATE nodes SET tokens = tokens + $2 WHERE id = $1 RETURNING tokens"#,
        )
        .bind(id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tokens)
    }

    async fn set_node_benchmark(&self, id: &str, score: i64) -> Result<(), StoreError> {
        sqlx::query(r#"UPDATE nodes SET benchmark_score = $2 WHERE id = $1"#)
            .bind(id)
            .bind(score)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_job(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            INSERT INTO jobs (node_id, image, status, result)
            VALUES ($1, $2, $3, $4)
            RETURNING id, node_id, image, status, result, created_at
            "#,
        )
        .bind(&job.node_id)
        .bind(&job.image)
        .bind(&job.status)
        .bind(&job.result)
        .fetch_one(&self.pool)
        .await?;
        Ok(record)
    }

    async fn recent_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        let rows = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT id, node_id, image, status, result, created_at
            FROM jobs
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_customer(&self, customer: CustomerRecord) -> Result<(), StoreError> {
        sqlx::query(r#"INSERT INTO customers (id, api_key, credits) VALUES ($1, $2, $3)"#)
            .bind(customer.id)
            .bind(&customer.api_key)
            .bind(customer.credits)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn customer_count(&self) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM customers"#)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn consume_credit(&self, api_key: &str) -> Result<CreditCheck, StoreError> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE customers SET credits = credits - 1
            WHERE api_key = $1 AND credits > 0
            RETURNING credits
            "#,
        )
        .bind(api_key)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(remaining) = remaining {
            return Ok(CreditCheck::Granted { remaining });
        }
        let exists: bool =
            sqlx::query_scalar(r#"SELECT EXISTS (SELECT 1 FROM customers WHERE api_key = $1)"#)
                .bind(api_key)
                .fetch_one(&self.pool)
                .await?;
        Ok(if exists {
            CreditCheck::Exhausted
        } else {
            CreditCheck::Unknown
        })
    }
}
