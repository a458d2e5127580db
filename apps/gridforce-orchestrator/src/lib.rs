//! GridForce orchestrator.
//!
//! Providers hold a websocket open to `/ws`, authenticate with an `AUTH`
//! frame and receive `JOB_OFFER`s pushed by [`dispatch::Dispatcher`]. Their
//! `JOB_RESULT` replies feed the [`ledger::RewardLedger`], which keeps token
//! balances and requests on-chain settlement.

pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod ledger;
pub mod registry;
pub mod routes;
pub mod session;
pub mod settlement;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod websocket;

pub use routes::{build_router, StaticDirs};
pub use state::AppState;
