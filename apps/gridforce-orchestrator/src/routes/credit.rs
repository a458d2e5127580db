use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};
use metrics::counter;
use tracing::debug;

use super::ApiError;
use crate::state::AppState;
use crate::store::CreditCheck;

pub const API_KEY_HEADER: &str = "X-API-KEY";

/// An API key that has just paid one credit for the current request.
///
/// Extraction spends the credit before the handler sees the body, so a
/// request that later fails still costs a credit.
#[derive(Clone, Debug)]
pub struct CreditedKey {
    pub api_key: String,
    pub remaining: i64,
}

#[async_trait]
impl FromRequestParts<AppState> for CreditedKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let api_key = extract_api_key(&parts.headers).ok_or(ApiError::Unauthorized)?;
        match state.store.consume_credit(&api_key).await? {
            CreditCheck::Granted { remaining } => {
                counter!("gridforce_credits_consumed_total").increment(1);
                debug!(remaining, "credit consumed");
                Ok(CreditedKey { api_key, remaining })
            }
            CreditCheck::Exhausted => {
                counter!("gridforce_credit_rejections_total", "reason" => "exhausted").increment(1);
                Err(ApiError::PaymentRequired)
            }
            CreditCheck::Unknown => {
                counter!("gridforce_credit_rejections_total", "reason" => "unknown_key")
                    .increment(1);
                Err(ApiError::Unauthorized)
            }
        }
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_owned)
}
