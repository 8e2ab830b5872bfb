//! Provider-side engine for the DRAIN off-chain micropayment channel
//! protocol.
//!
//! A consumer deposits funds into an on-chain channel contract and then
//! authorizes spending by handing this provider signed, monotonically
//! increasing vouchers instead of one transaction per request. The crate
//! decides on every inbound request whether a voucher is valid and
//! sufficiently funded before any costly work happens, remembers the highest
//! voucher per channel, and settles vouchers on-chain before the channel
//! expires and the consumer can reclaim the deposit.
//!
//! The pieces: [`DrainEngine`] validates and commits vouchers over a
//! [`ChannelLedger`], persisting through a [`VoucherStore`] and reading the
//! chain through a [`ChannelRpc`]; [`AutoClaimScheduler`] settles channels
//! nearing expiry in the background; [`middleware::paid_router`] gates an
//! axum router behind the voucher check.

pub mod claim;
pub mod config;
pub mod engine;
pub mod handlers;
pub mod middleware;
pub mod rpc;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod types;
pub mod utils;

pub use claim::{ClaimOutcome, ClaimReport};
pub use config::DrainConfig;
pub use engine::{DrainEngine, EngineSettings, HealthReport, Stats, Validation};
pub use handlers::admin_router;
pub use middleware::{paid_router, payment_middleware, VOUCHER_HEADER};
pub use rpc::{ChannelRpc, EthersChannelRpc, RpcError, RpcErrorKind};
pub use scheduler::AutoClaimScheduler;
pub use state::ChannelLedger;
pub use store::{JsonFileStore, MemoryStore, StoreError, VoucherStore};
pub use types::{ChannelState, Error, OnChainChannel, RejectReason, StoredVoucher, Voucher};
pub use utils::crypto::VoucherDomain;

use std::sync::Arc;

/// Build a fully wired engine from configuration: JSON file store at the
/// configured path, ethers RPC client against the channel contract, ledger
/// rebuilt from disk.
pub async fn build_engine(config: &DrainConfig) -> Result<Arc<DrainEngine>, Error> {
    let settings = config.engine_settings()?;
    let store = Arc::new(JsonFileStore::open(&config.store_path)?);
    let rpc = Arc::new(EthersChannelRpc::connect(
        &config.rpc_url,
        config.chain_id,
        config.contract,
        &config.provider_key,
        config.rpc_timeout(),
    )?);

    let engine = Arc::new(DrainEngine::new(settings, store, rpc));
    engine.load().await?;
    Ok(engine)
}
