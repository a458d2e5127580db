//! Wire protocol shared by the GridForce orchestrator and its providers.
//!
//! Every frame on the provider socket is a JSON [`Envelope`] whose `payload`
//! is only interpreted once the `type` tag is known. Keeping the shapes here
//! lets the orchestrator and the provider agent agree on field names without
//! copying structs across crates.

pub mod envelope;
pub mod payload;
pub mod result;

pub use envelope::{Envelope, MessageType, ProtocolError, ProtocolMessage};
pub use payload::{AuthPayload, JobOffer};
pub use result::{ResultKind, BENCHMARK_MARKER};

/// Number of reward units credited for one completed (non-benchmark) job.
pub const REWARD_UNIT: i64 = 10;

/// Wallet that never receives settlement.
pub const BURN_ADDRESS: &str = "0x000000000000000000000000000000000000dead";

/// Returns true when `wallet` is a usable settlement destination.
pub fn is_settleable_wallet(wallet: &str) -> bool {
    !wallet.is_empty() && !wallet.eq_ignore_ascii_case(BURN_ADDRESS)
}
