//! Persistent voucher store.
//!
//! Durable record of every voucher ever received plus per-channel aggregate
//! state. No business logic lives here; the trait is pure get/put/list, and
//! every mutation is durable before the caller's in-memory view is allowed to
//! move.

mod json;

pub use json::JsonFileStore;

use crate::types::{ChannelState, StoredVoucher};
use crate::utils::unix_now;
use async_trait::async_trait;
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted document could not be parsed. Fatal at startup — a
    /// half-written or hand-edited store must not be silently discarded.
    #[error("store corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_vouchers: u64,
    pub unclaimed_count: u64,
}

#[async_trait]
pub trait VoucherStore: Send + Sync {
    /// Append a newly accepted voucher.
    async fn append(&self, voucher: StoredVoucher) -> Result<(), StoreError>;

    async fn get_channel(&self, channel_id: H256) -> Result<Option<ChannelState>, StoreError>;

    async fn put_channel(&self, state: ChannelState) -> Result<(), StoreError>;

    async fn all_channels(&self) -> Result<Vec<ChannelState>, StoreError>;

    async fn list_unclaimed(&self) -> Result<Vec<StoredVoucher>, StoreError>;

    /// Highest-nonce unclaimed voucher for every channel that has one.
    async fn highest_per_channel(&self) -> Result<HashMap<H256, StoredVoucher>, StoreError>;

    /// Highest-nonce unclaimed voucher for one channel.
    async fn highest_unclaimed(&self, channel_id: H256)
        -> Result<Option<StoredVoucher>, StoreError>;

    /// Flip every unclaimed voucher of the channel to claimed. `tx_hash` is
    /// absent when the voucher was settled without a transaction (zero
    /// balance) or dead-lettered. Returns how many records changed.
    async fn mark_claimed(
        &self,
        channel_id: H256,
        tx_hash: Option<H256>,
    ) -> Result<usize, StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// The full persisted document. Shared between the JSON file store and the
/// in-memory store so both expose identical semantics.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct StoreDocument {
    pub vouchers: Vec<StoredVoucher>,
    pub channels: HashMap<H256, ChannelState>,
}

impl StoreDocument {
    pub fn append(&mut self, voucher: StoredVoucher) {
        self.vouchers.push(voucher);
    }

    pub fn highest_unclaimed(&self, channel_id: H256) -> Option<StoredVoucher> {
        self.vouchers
            .iter()
            .filter(|v| v.channel_id == channel_id && !v.claimed)
            .max_by_key(|v| v.nonce)
            .cloned()
    }

    pub fn highest_per_channel(&self) -> HashMap<H256, StoredVoucher> {
        let mut best: HashMap<H256, StoredVoucher> = HashMap::new();
        for voucher in self.vouchers.iter().filter(|v| !v.claimed) {
            match best.get(&voucher.channel_id) {
                Some(current) if current.nonce >= voucher.nonce => {}
                _ => {
                    best.insert(voucher.channel_id, voucher.clone());
                }
            }
        }
        best
    }

    pub fn mark_claimed(&mut self, channel_id: H256, tx_hash: Option<H256>) -> usize {
        let now = unix_now();
        let mut changed = 0;
        for voucher in self
            .vouchers
            .iter_mut()
            .filter(|v| v.channel_id == channel_id && !v.claimed)
        {
            voucher.claimed = true;
            voucher.claimed_at = Some(now);
            voucher.claim_tx_hash = tx_hash;
            changed += 1;
        }
        changed
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            total_vouchers: self.vouchers.len() as u64,
            unclaimed_count: self.vouchers.iter().filter(|v| !v.claimed).count() as u64,
        }
    }
}

/// Ephemeral store with the same contract as [`JsonFileStore`]. Used by tests
/// and useful for dry runs where durability is explicitly not wanted.
#[derive(Default)]
pub struct MemoryStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VoucherStore for MemoryStore {
    async fn append(&self, voucher: StoredVoucher) -> Result<(), StoreError> {
        self.doc.lock().await.append(voucher);
        Ok(())
    }

    async fn get_channel(&self, channel_id: H256) -> Result<Option<ChannelState>, StoreError> {
        Ok(self.doc.lock().await.channels.get(&channel_id).cloned())
    }

    async fn put_channel(&self, state: ChannelState) -> Result<(), StoreError> {
        self.doc
            .lock()
            .await
            .channels
            .insert(state.channel_id, state);
        Ok(())
    }

    async fn all_channels(&self) -> Result<Vec<ChannelState>, StoreError> {
        Ok(self.doc.lock().await.channels.values().cloned().collect())
    }

    async fn list_unclaimed(&self) -> Result<Vec<StoredVoucher>, StoreError> {
        Ok(self
            .doc
            .lock()
            .await
            .vouchers
            .iter()
            .filter(|v| !v.claimed)
            .cloned()
            .collect())
    }

    async fn highest_per_channel(&self) -> Result<HashMap<H256, StoredVoucher>, StoreError> {
        Ok(self.doc.lock().await.highest_per_channel())
    }

    async fn highest_unclaimed(
        &self,
        channel_id: H256,
    ) -> Result<Option<StoredVoucher>, StoreError> {
        Ok(self.doc.lock().await.highest_unclaimed(channel_id))
    }

    async fn mark_claimed(
        &self,
        channel_id: H256,
        tx_hash: Option<H256>,
    ) -> Result<usize, StoreError> {
        Ok(self.doc.lock().await.mark_claimed(channel_id, tx_hash))
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.doc.lock().await.stats())
    }
}
