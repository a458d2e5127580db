use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ApiResult;
use crate::session::{Session, SessionStatus};
use crate::state::AppState;
use crate::store::JobRecord;

const RECENT_JOBS_LIMIT: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub device: String,
    pub wallet: String,
    pub specs: String,
    pub ip: String,
    pub status: SessionStatus,
    pub tokens: i64,
    pub benchmark_score: i64,
}

impl From<Session> for NodeSummary {
    fn from(session: Session) -> Self {
        Self {
            device: session.device_id,
            wallet: session.wallet_address,
            specs: session.capabilities_summary,
            ip: session.ip,
            status: session.status,
            tokens: session.token_balance,
            benchmark_score: session.benchmark_score,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: i64,
    pub node_id: String,
    pub image: String,
    pub status: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

impl From<JobRecord> for JobSummary {
    fn from(job: JobRecord) -> Self {
        Self {
            id: job.id,
            node_id: job.node_id,
            image: job.image,
            status: job.status,
            result: job.result,
            created_at: job.created_at,
        }
    }
}

pub(super) async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeSummary>> {
    Json(
        state
            .registry
            .list()
            .into_iter()
            .map(NodeSummary::from)
            .collect(),
    )
}

pub(super) async fn list_jobs(State(state): State<AppState>) -> ApiResult<Vec<JobSummary>> {
    let jobs = state.store.recent_jobs(RECENT_JOBS_LIMIT).await?;
    Ok(Json(jobs.into_iter().map(JobSummary::from).collect()))
}
