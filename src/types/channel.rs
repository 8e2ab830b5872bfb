use crate::utils::unix_now;
use ethers::types::{Address, Signature, H256, U256};
use serde::{Deserialize, Serialize};

/// A signed, cumulative spending authorization for one channel.
///
/// `amount` states "the provider may claim up to this much in total" — it is
/// cumulative, not incremental. `nonce` is a strictly increasing sequence the
/// provider uses only for local ordering and duplicate suppression; the
/// contract settles on `amount` alone.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub channel_id: H256,
    pub amount: U256,
    pub nonce: U256,
    pub signature: Signature,
}

/// Channel fields as read from the channel contract.
#[derive(Clone, Debug, PartialEq)]
pub struct OnChainChannel {
    pub consumer: Address,
    pub provider: Address,
    pub deposit: U256,
    pub claimed: U256,
    pub expiry: u64,
}

impl OnChainChannel {
    /// The contract returns a zeroed record for channels that were never
    /// opened.
    pub fn exists(&self) -> bool {
        self.consumer != Address::zero()
    }
}

/// The ledger's materialized per-channel view.
///
/// Invariants: `total_charged` never exceeds `deposit`, is monotonically
/// non-decreasing, and equals the sum of all committed costs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChannelState {
    pub channel_id: H256,
    pub consumer: Address,
    pub provider: Address,
    pub deposit: U256,
    pub expiry: u64,
    pub total_charged: U256,
    pub last_voucher: Option<Voucher>,
}

impl ChannelState {
    /// Seed a fresh ledger entry from an on-chain read.
    pub fn from_chain(channel_id: H256, chain: &OnChainChannel) -> Self {
        Self {
            channel_id,
            consumer: chain.consumer,
            provider: chain.provider,
            deposit: chain.deposit,
            expiry: chain.expiry,
            total_charged: U256::zero(),
            last_voucher: None,
        }
    }

    pub fn remaining(&self) -> U256 {
        self.deposit.saturating_sub(self.total_charged)
    }

    /// True once `expiry` is within `buffer_secs` of `now` (or already past).
    pub fn expires_within(&self, now: u64, buffer_secs: u64) -> bool {
        self.expiry <= now.saturating_add(buffer_secs)
    }
}

/// Durable record of a received voucher.
///
/// Append-only except for the claimed-flag transition performed when a claim
/// lands on-chain or the voucher is dead-lettered.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StoredVoucher {
    pub channel_id: H256,
    pub amount: U256,
    pub nonce: U256,
    pub signature: Signature,
    pub consumer: Address,
    pub received_at: u64,
    pub claimed: bool,
    pub claimed_at: Option<u64>,
    pub claim_tx_hash: Option<H256>,
}

impl StoredVoucher {
    pub fn record(voucher: &Voucher, consumer: Address) -> Self {
        Self {
            channel_id: voucher.channel_id,
            amount: voucher.amount,
            nonce: voucher.nonce,
            signature: voucher.signature,
            consumer,
            received_at: unix_now(),
            claimed: false,
            claimed_at: None,
            claim_tx_hash: None,
        }
    }

    pub fn voucher(&self) -> Voucher {
        Voucher {
            channel_id: self.channel_id,
            amount: self.amount,
            nonce: self.nonce,
            signature: self.signature,
        }
    }
}
