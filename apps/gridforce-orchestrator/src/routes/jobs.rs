use axum::{body::Bytes, extract::State};
use gridforce_protocol::JobOffer;
use serde::Deserialize;

use super::{ApiError, CreditedKey};
use crate::dispatch::DispatchError;
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct JobRequest {
    pub image: String,
    #[serde(default)]
    pub cmd: Vec<String>,
}

pub(super) async fn submit_job(
    _credit: CreditedKey,
    State(state): State<AppState>,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let request: JobRequest = serde_json::from_slice(&body)
        .map_err(|err| ApiError::BadRequest(format!("invalid job request: {err}")))?;

    match state
        .dispatcher
        .dispatch(JobOffer::new(request.image, request.cmd))
        .await
    {
        Ok(_) => Ok("Job dispatched"),
        Err(DispatchError::NoProvidersAvailable) => {
            Err(ApiError::ServiceUnavailable("no providers available"))
        }
        Err(err) => Err(ApiError::Internal(err.to_string())),
    }
}
