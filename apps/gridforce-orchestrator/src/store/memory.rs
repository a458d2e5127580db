use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{CreditCheck, CustomerRecord, JobRecord, NewJob, NodeRecord, Store, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    nodes: Mutex<Vec<NodeRecord>>,
    jobs: Mutex<Vec<JobRecord>>,
    customers: Mutex<Vec<CustomerRecord>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn nodes(&self) -> Vec<NodeRecord> {
        self.nodes.lock().await.clone()
    }

    pub async fn jobs(&self) -> Vec<JobRecord> {
        self.jobs.lock().await.clone()
    }

    pub async fn customer(&self, api_key: &str) -> Option<CustomerRecord> {
        self.customers
            .lock()
            .await
            .iter()
            .find(|c| c.api_key == api_key)
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_node(&self, id: &str) -> Result<Option<NodeRecord>, StoreError> {
        Ok(self.nodes.lock().await.iter().find(|n| n.id == id).cloned())
    }

    async fn save_node(&self, node: NodeRecord) -> Result<(), StoreError> {
        let mut nodes = self.nodes.lock().await;
        if let Some(existing) = nodes.iter_mut().find(|n| n.id == node.id) {
            *existing = node;
        } else {
            nodes.push(node);
        }
        Ok(())
    }

    async fn mark_node(
        &self,
        id: &str,
        ip_address: &str,
        status: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut nodes = self.nodes.lock().await;
        if let Some(existing) = nodes.iter_mut().find(|n| n.id == id) {
            existing.ip_address = ip_address.to_string();
            existing.status = status.to_string();
            existing.last_seen = seen_at;
        } else {
            nodes.push(NodeRecord {
                id: id.to_string(),
                ip_address: ip_address.to_string(),
                device_id: String::new(),
                wallet_address: String::new(),
                specs: String::new(),
                status: status.to_string(),
                last_seen: seen_at,
                tokens: 0,
                benchmark_score: 0,
            });
        }
        Ok(())
    }

    async fn add_node_tokens(&self, id: &str, delta: i64) -> Result<Option<i64>, StoreError> {
        let mut nodes = self.nodes.lock().await;
        Ok(nodes.iter_mut().find(|n| n.id == id).map(|node| {
            node.tokens += delta;
            node.tokens
        }))
    }

    async fn set_node_benchmark(&self, id: &str, score: i64) -> Result<(), StoreError> {
        if let Some(node) = self.nodes.lock().await.iter_mut().find(|n| n.id == id) {
            node.benchmark_score = score;
        }
        Ok(())
    }

    async fn create_job(&self, job: NewJob) -> Result<JobRecord, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let id = jobs.last().map(|j| j.id + 1).unwrap_or(1);
        let record = JobRecord {
            id,
            node_id: job.node_id,
            image: job.image,
            status: job.status,
            result: job.result,
            created_at: Utc::now(),
        };
        jobs.push(record.clone());
        Ok(record)
    }

    async fn recent_jobs(&self, limit: i64) -> Result<Vec<JobRecord>, StoreError> {
        let jobs = self.jobs.lock().await;
        let limit = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
        Ok(jobs.iter().rev().take(limit).cloned().collect())
    }

    async fn create_customer(&self, customer: CustomerRecord) -> Result<(), StoreError> {
        let mut customers = self.customers.lock().await;
        if customers.iter().any(|c| c.api_key == customer.api_key) {
            return Err(StoreError::Backend(format!(
                "duplicate api key {}",
                customer.api_key
            )));
        }
        customers.push(customer);
        Ok(())
    }

    async fn customer_count(&self) -> Result<i64, StoreError> {
        Ok(self.customers.lock().await.len() as i64)
    }

    async fn consume_credit(&self, api_key: &str) -> Result<CreditCheck, StoreError> {
        let mut customers = self.customers.lock().await;
        let Some(customer) = customers.iter_mut().find(|c| c.api_key == api_key) else {
            return Ok(CreditCheck::Unknown);
        };
        if customer.credits <= 0 {
            return Ok(CreditCheck::Exhausted);
        }
        customer.credits -= 1;
        Ok(CreditCheck::Granted {
            remaining: customer.credits,
        })
    }
}
