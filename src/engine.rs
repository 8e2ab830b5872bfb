//! Voucher validation and the caller-facing engine facade.
//!
//! `validate` is a pure decision over the ledger plus one possible chain read
//! to hydrate a newly seen channel; it never mutates anything. `commit` is
//! the explicit mutation step, invoked by the caller only after the paid work
//! actually happened, so a unit of work that fails downstream never consumes
//! the voucher.

use crate::rpc::ChannelRpc;
use crate::state::ChannelLedger;
use crate::store::VoucherStore;
use crate::types::{ChannelState, Error, RejectReason, Voucher};
use crate::utils::crypto::VoucherDomain;
use ethers::types::{Address, U256};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of validating a voucher against a required charge.
#[derive(Debug, Clone)]
pub enum Validation {
    Accepted {
        voucher: Voucher,
        channel: ChannelState,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl Validation {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Validation::Accepted { .. })
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Validation::Rejected { reason } => Some(*reason),
            Validation::Accepted { .. } => None,
        }
    }
}

/// Aggregate counters exposed to operators.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_vouchers: u64,
    pub unclaimed_count: u64,
    pub total_earned: U256,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub rpc_ok: bool,
    pub store_ok: bool,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.rpc_ok && self.store_ok
    }
}

/// Everything the engine needs to know about its own identity and policy.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// The account claims are signed with; vouchers for channels naming a
    /// different provider are rejected.
    pub provider: Address,
    /// Typed-data domain of the channel contract.
    pub domain: VoucherDomain,
    /// Claims below this amount are skipped unless forced.
    pub min_claim_amount: U256,
}

/// The provider-side DRAIN engine: voucher validation, channel bookkeeping
/// and claim settlement over injected chain and storage collaborators.
pub struct DrainEngine {
    pub(crate) settings: EngineSettings,
    pub(crate) ledger: ChannelLedger,
    pub(crate) store: Arc<dyn VoucherStore>,
    pub(crate) rpc: Arc<dyn ChannelRpc>,
    pub(crate) rpc_healthy: AtomicBool,
    pub(crate) store_healthy: AtomicBool,
}

impl DrainEngine {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn VoucherStore>,
        rpc: Arc<dyn ChannelRpc>,
    ) -> Self {
        Self {
            settings,
            ledger: ChannelLedger::new(),
            store,
            rpc,
            rpc_healthy: AtomicBool::new(true),
            store_healthy: AtomicBool::new(true),
        }
    }

    /// Rebuild the ledger from the persisted store. Call once before serving.
    pub async fn load(&self) -> Result<usize, Error> {
        let loaded = self.ledger.load_from(&*self.store).await?;
        info!("ledger rebuilt with {} channel(s) from store", loaded);
        Ok(loaded)
    }

    pub fn ledger(&self) -> &ChannelLedger {
        &self.ledger
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Parse a voucher carried in a request header and validate it.
    pub async fn validate_and_reserve(
        &self,
        header_value: &str,
        required_charge: U256,
    ) -> Result<Validation, Error> {
        let voucher: Voucher = serde_json::from_str(header_value)
            .map_err(|e| Error::InvalidVoucher(e.to_string()))?;
        Ok(self.validate(&voucher, required_charge).await)
    }

    /// Decide whether a voucher is acceptable for `required_charge` more of
    /// work. Checks run in order and fail fast, each with a distinct reason.
    pub async fn validate(&self, voucher: &Voucher, required_charge: U256) -> Validation {
        let reject = |reason: RejectReason| {
            debug!(
                "rejected voucher for channel 0x{}: {}",
                hex::encode(voucher.channel_id.as_bytes()),
                reason.as_code()
            );
            Validation::Rejected { reason }
        };

        // Channel existence, hydrating from chain on first sight. An
        // unreachable chain read degrades to rejection, never acceptance.
        let channel = match self.channel_or_hydrate(voucher).await {
            Ok(Some(channel)) => channel,
            Ok(None) | Err(()) => return reject(RejectReason::ChannelNotFound),
        };

        // Ownership: a voucher addressed to another provider sharing this
        // infrastructure must not be spendable here.
        if channel.provider != self.settings.provider {
            return reject(RejectReason::WrongProvider);
        }

        // Sufficiency: the new cumulative authorization must cover everything
        // already committed plus this unit of work. Intentionally stricter
        // than checking the remaining balance — a consumer cannot roll back
        // authorization below what has already been spent.
        let expected_total = channel.total_charged.saturating_add(required_charge);
        if voucher.amount < expected_total {
            return reject(RejectReason::InsufficientFunds);
        }

        // Deposit bound: never accept a claim exceeding what is escrowed.
        if voucher.amount > channel.deposit {
            return reject(RejectReason::ExceedsDeposit);
        }

        // Replay ordering: nonces are strictly increasing per channel.
        if let Some(last) = &channel.last_voucher {
            if voucher.nonce <= last.nonce {
                return reject(RejectReason::InvalidNonce);
            }
        }

        // Cryptographic check against the consumer recorded on-chain.
        match self.settings.domain.recover(voucher) {
            Ok(signer) if signer == channel.consumer => {}
            Ok(_) | Err(_) => return reject(RejectReason::InvalidSignature),
        }

        Validation::Accepted {
            voucher: voucher.clone(),
            channel,
        }
    }

    /// Record an accepted voucher once its paid work has completed.
    pub async fn commit(&self, voucher: &Voucher, cost: U256) -> Result<ChannelState, Error> {
        let result = self.ledger.commit(voucher, cost, &*self.store).await;
        self.store_healthy
            .store(!matches!(&result, Err(Error::Store(_))), Ordering::SeqCst);
        result
    }

    pub async fn stats(&self) -> Result<Stats, Error> {
        let store_stats = self.store.stats().await?;
        Ok(Stats {
            total_vouchers: store_stats.total_vouchers,
            unclaimed_count: store_stats.unclaimed_count,
            total_earned: self.ledger.total_earned().await,
        })
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            rpc_ok: self.rpc_healthy.load(Ordering::SeqCst),
            store_ok: self.store_healthy.load(Ordering::SeqCst),
        }
    }

    /// Ledger fast path; on miss, read the channel from chain and seed a
    /// fresh entry with nothing charged. `Ok(None)` means the channel does
    /// not exist on-chain, `Err(())` that the chain was unreachable.
    async fn channel_or_hydrate(&self, voucher: &Voucher) -> Result<Option<ChannelState>, ()> {
        if let Some(state) = self.ledger.get(voucher.channel_id).await {
            return Ok(Some(state));
        }

        match self.rpc.read_channel(voucher.channel_id).await {
            Ok(chain) => {
                self.rpc_healthy.store(true, Ordering::SeqCst);
                if !chain.exists() {
                    return Ok(None);
                }
                let state = ChannelState::from_chain(voucher.channel_id, &chain);
                info!(
                    "hydrated channel 0x{} (deposit {}, expiry {})",
                    hex::encode(voucher.channel_id.as_bytes()),
                    state.deposit,
                    state.expiry
                );
                self.ledger.upsert(state.clone()).await;
                Ok(Some(state))
            }
            Err(e) => {
                self.rpc_healthy.store(false, Ordering::SeqCst);
                warn!(
                    "chain read failed hydrating channel 0x{}: {}",
                    hex::encode(voucher.channel_id.as_bytes()),
                    e
                );
                Err(())
            }
        }
    }
}
