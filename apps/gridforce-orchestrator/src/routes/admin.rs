use axum::{extract::State, Json};
use rand::RngCore;
use serde::Serialize;
use tracing::info;

use super::ApiResult;
use crate::state::AppState;
use crate::store::{CustomerRecord, STARTING_CREDITS};

const API_KEY_PREFIX: &str = "sk_live_";

#[derive(Debug, Clone, Serialize)]
pub struct CreateCustomerResponse {
    pub api_key: String,
    pub credits: i64,
    pub message: &'static str,
}

pub(super) async fn create_customer(
    State(state): State<AppState>,
) -> ApiResult<CreateCustomerResponse> {
    let api_key = generate_api_key();
    let customer = CustomerRecord::new(api_key.clone(), STARTING_CREDITS);
    let id = customer.id;
    state.store.create_customer(customer).await?;
    info!(customer_id = %id, "customer created");
    Ok(Json(CreateCustomerResponse {
        api_key,
        credits: STARTING_CREDITS,
        message: "Customer created successfully",
    }))
}

fn generate_api_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{API_KEY_PREFIX}{}", hex::encode(bytes))
}
