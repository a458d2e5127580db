//! Persistence collaborator for nodes, jobs and customers.
//!
//! The orchestrator only ever talks to [`Store`]; [`MemoryStore`] backs tests
//! and database-less runs, [`PostgresStore`] backs production.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Key seeded when the customer table is empty.
pub const DEMO_API_KEY: &str = "sk_live_demo12345";
pub const STARTING_CREDITS: i64 = 1000;
pub const JOB_STATUS_COMPLETED: &str = "COMPLETED";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Persisted mirror of a provider session, keyed by connection key.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct NodeRecord {
    pub id: String,
    pub ip_address: String,
    pub device_id: String,
    pub wallet_address: String,
    pub specs: String,
    pub status: String,
    pub last_seen: DateTime<Utc>,
    pub tokens: i64,
    pub benchmark_score: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub node_id: String,
    pub image: String,
    pub status: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub node_id: String,
    pub image: String,
    pub status: String,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct CustomerRecord {
    pub id: Uuid,
    pub api_key: String,
    pub credits: i64,
}

impl CustomerRecord {
    pub fn new(api_key: impl Into<String>, credits: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            api_key: api_key.into(),
            credits,
        }
    }
}

/// Outcome of trying to spend one credit for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditCheck {
    /// One credit was taken; `remaining` is the balance afterwards.
    Granted { remaining: i64 },
    Exhausted,
    Unknown,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_node(&self, id: &str) -> Result<Option<NodeRecord>, StoreError>;

    /// Full upsert of every column.
    async fn save_node(&self, node: NodeRecord) -> Result<(), StoreError>;

    /// Upserts status, address and last-seen, leaving counters and identity
    /// untouched on an existing row.
    async fn mark_node(
        &self,
        id: &str,
        ip_address: &str,
        status: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Increments `tokens` in place and returns the new value, or `None` if
    /// no row exists.
    async fn add_node_tokens(&self, id: &str, delta: i64) -> Result<Option<i64>, StoreError>;

    async fn set_node_benchmark(&self, id: &str, score: i64) -> Result<(), StoreError>;

    async fn create_job(&self, job: NewJob) -> Result<JobRecord, StoreError>;

    /// Newest first.
    async fn recent_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError>;

    async fn create_customer(&self, customer: CustomerRecord) -> Result<(), StoreError>;

    async fn customer_count(&self) -> Result<i64, StoreError>;

    /// Atomically spends one credit if the key exists and has a positive balance.
    async fn consume_credit(&self, api_key: &str) -> Result<CreditCheck, StoreError>;
}

/// Inserts the demo customer when no customer exists yet. Returns whether a
/// row was created.
pub async fn seed_demo_customer(store: &dyn Store) -> Result<bool, StoreError> {
    if store.customer_count().await? > 0 {
        return Ok(false);
    }
    store
        .create_customer(CustomerRecord::new(DEMO_API_KEY, STARTING_CREDITS))
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_customer_is_seeded_once() {
        let store = MemoryStore::new();
        assert!(seed_demo_customer(store.as_ref()).await.unwrap());
        assert!(!seed_demo_customer(store.as_ref()).await.unwrap());
        assert_eq!(store.customer_count().await.unwrap(), 1);
        assert_eq!(
            store.consume_credit(DEMO_API_KEY).await.unwrap(),
            CreditCheck::Granted {
                remaining: STARTING_CREDITS - 1
            }
        );
    }
}
