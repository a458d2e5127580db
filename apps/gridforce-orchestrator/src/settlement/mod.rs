//! Reward settlement: turning earned units into on-chain mints.

pub mod rlp;
mod rpc;

use async_trait::async_trait;

pub use rpc::{RpcSettlement, RpcSettlementConfig};

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
    #[error("invalid address {0}")]
    InvalidAddress(String),
    #[error("amount {0} overflows the token unit conversion")]
    AmountOverflow(u64),
    #[error("RPC transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("RPC response missing result for {0}")]
    MissingResult(String),
    #[error("invalid quantity in {method} response: {value}")]
    InvalidQuantity { method: String, value: String },
    #[error("signing failed: {0}")]
    Signing(String),
}

impl SettlementError {
    pub fn metric_label(&self) -> &'static str {
        match self {
            SettlementError::InvalidKey(_) => "invalid_key",
            SettlementError::InvalidAddress(_) => "invalid_address",
            SettlementError::AmountOverflow(_) => "amount_overflow",
            SettlementError::Transport(_) => "transport",
            SettlementError::Rpc { .. } => "rpc",
            SettlementError::MissingResult(_) => "missing_result",
            SettlementError::InvalidQuantity { .. } => "invalid_quantity",
            SettlementError::Signing(_) => "signing",
        }
    }
}

/// Mints reward units to a wallet and returns the transaction id.
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn mint(&self, wallet: &str, amount: u64) -> Result<String, SettlementError>;
}
