use std::sync::Arc;

use gridforce_protocol::{is_settleable_wallet, ResultKind, REWARD_UNIT};
use metrics::counter;
use tracing::{info, warn};

use crate::registry::ProviderRegistry;
use crate::session::{ConnectionKey, Session};
use crate::settlement::Settlement;
use crate::store::{NewJob, Store, JOB_STATUS_COMPLETED};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementStatus {
    Submitted(String),
    Failed(String),
    Skipped,
}

impl SettlementStatus {
    fn metric_label(&self) -> &'static str {
        match self {
            SettlementStatus::Submitted(_) => "submitted",
            SettlementStatus::Failed(_) => "failed",
            SettlementStatus::Skipped => "skipped",
        }
    }
}

/// What a single `JOB_RESULT` did to the books.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOutcome {
    Benchmark {
        score: i64,
        job_id: Option<i64>,
    },
    Completion {
        /// Session balance after the credit; `None` when the session is gone.
        balance: Option<i64>,
        job_id: Option<i64>,
        settlement: SettlementStatus,
    },
}

/// Applies job results to session counters, persisted rows and settlement.
///
/// Each connection feeds its results in order from its own task, so updates
/// for a given provider never race each other.
#[derive(Clone)]
pub struct RewardLedger {
    registry: ProviderRegistry,
    store: Arc<dyn Store>,
    settlement: Option<Arc<dyn Settlement>>,
}

impl RewardLedger {
    pub fn new(
        registry: ProviderRegistry,
        store: Arc<dyn Store>,
        settlement: Option<Arc<dyn Settlement>>,
    ) -> Self {
        Self {
            registry,
            store,
            settlement,
        }
    }

    pub async fn apply(&self, key: &ConnectionKey, result: &str) -> LedgerOutcome {
        match ResultKind::classify(result) {
            ResultKind::Benchmark { score } => self.record_benchmark(key, score, result).await,
            ResultKind::Completion => self.record_completion(key, result).await,
        }
    }

    async fn record_benchmark(
        &self,
        key: &ConnectionKey,
        score: i64,
        result: &str,
    ) -> LedgerOutcome {
        let session = self.registry.update(key, |session| {
            session.benchmark_score = score;
            session.touch();
        });
        let job_id = self.record_job(key, session.as_ref(), result).await;
        if let Err(err) = self.store.set_node_benchmark(key.as_str(), score).await {
            warn!(connection = %key, error = %err, "failed to persist benchmark score");
        }
        counter!("gridforce_benchmarks_total").increment(1);
        info!(connection = %key, score, job_id = ?job_id, "benchmark reported");
        LedgerOutcome::Benchmark { score, job_id }
    }

    async fn record_completion(&self, key: &ConnectionKey, result: &str) -> LedgerOutcome {
        let session = self.registry.update(key, |session| {
            session.token_balance += REWARD_UNIT;
            session.touch();
        });
        let balance = session.as_ref().map(|s| s.token_balance);
        counter!("gridforce_reward_units_total").increment(REWARD_UNIT as u64);

        let job_id = self.record_job(key, session.as_ref(), result).await;

        match self.store.add_node_tokens(key.as_str(), REWARD_UNIT).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!(connection = %key, "no node row to credit"),
            Err(err) => warn!(connection = %key, error = %err, "failed to persist token credit"),
        }

        let wallet = session
            .as_ref()
            .map(|s| s.wallet_address.clone())
            .unwrap_or_default();
        let settlement = self.settle(&wallet).await;
        counter!("gridforce_settlements_total", "outcome" => settlement.metric_label())
            .increment(1);

        info!(
            connection = %key,
            balance = ?balance,
            job_id = ?job_id,
            settlement = ?settlement,
            "job completed"
        );
        LedgerOutcome::Completion {
            balance,
            job_id,
            settlement,
        }
    }

    /// Writes the `COMPLETED` job row for one result.
    async fn record_job(
        &self,
        key: &ConnectionKey,
        session: Option<&Session>,
        result: &str,
    ) -> Option<i64> {
        let job = NewJob {
            node_id: session
                .map(|s| s.job_node_id().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            image: session
                .and_then(|s| s.last_offered_image.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            status: JOB_STATUS_COMPLETED.to_string(),
            result: result.to_string(),
        };
        match self.store.create_job(job).await {
            Ok(record) => Some(record.id),
            Err(err) => {
                warn!(connection = %key, error = %err, "failed to persist job");
                None
            }
        }
    }

    async fn settle(&self, wallet: &str) -> SettlementStatus {
        if !is_settleable_wallet(wallet) {
            return SettlementStatus::Skipped;
        }
        let Some(settlement) = &self.settlement else {
            return SettlementStatus::Skipped;
        };
        match settlement.mint(wallet, REWARD_UNIT as u64).await {
            Ok(tx) => {
                info!(wallet, tx = %tx, "reward minted");
                SettlementStatus::Submitted(tx)
            }
            Err(err) => {
                counter!("gridforce_settlement_errors_total", "reason" => err.metric_label())
                    .increment(1);
                warn!(wallet, error = %err, "reward settlement failed");
                SettlementStatus::Failed(err.to_string())
            }
        }
    }
}
