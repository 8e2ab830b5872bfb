//! In-memory channel ledger.
//!
//! The single place `total_charged` is read and mutated. Rebuilt from the
//! voucher store at startup and hydrated from chain reads when a channel is
//! first seen; reconciled against the chain only at claim time.

use crate::store::{StoreError, VoucherStore};
use crate::types::{ChannelState, Error, StoredVoucher, Voucher};
use ethers::types::{H256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone, Default)]
pub struct ChannelLedger {
    channels: Arc<RwLock<HashMap<H256, ChannelState>>>,
}

impl ChannelLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, channel_id: H256) -> Option<ChannelState> {
        self.channels.read().await.get(&channel_id).cloned()
    }

    pub async fn upsert(&self, state: ChannelState) {
        self.channels.write().await.insert(state.channel_id, state);
    }

    pub async fn all(&self) -> Vec<ChannelState> {
        self.channels.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Channels whose expiry falls within `buffer_secs` of `now`.
    pub async fn expiring(&self, now: u64, buffer_secs: u64) -> Vec<H256> {
        self.channels
            .read()
            .await
            .values()
            .filter(|c| c.expires_within(now, buffer_secs))
            .map(|c| c.channel_id)
            .collect()
    }

    /// Sum of committed charges across all known channels.
    pub async fn total_earned(&self) -> U256 {
        self.channels
            .read()
            .await
            .values()
            .fold(U256::zero(), |acc, c| acc.saturating_add(c.total_charged))
    }

    /// Rebuild the in-memory view from persisted channel state. Called once
    /// at startup, before the engine serves requests.
    pub async fn load_from(&self, store: &dyn VoucherStore) -> Result<usize, StoreError> {
        let persisted = store.all_channels().await?;
        let count = persisted.len();
        let mut channels = self.channels.write().await;
        for state in persisted {
            channels.insert(state.channel_id, state);
        }
        Ok(count)
    }

    /// Record an accepted voucher after its paid work completed.
    ///
    /// The store write happens while the map's write lock is held and before
    /// the in-memory entry moves, so a crash mid-commit leaves the durable
    /// state at or ahead of what callers were told.
    pub async fn commit(
        &self,
        voucher: &Voucher,
        cost: U256,
        store: &dyn VoucherStore,
    ) -> Result<ChannelState, Error> {
        let mut channels = self.channels.write().await;
        let current = channels
            .get(&voucher.channel_id)
            .ok_or(Error::UnknownChannel(voucher.channel_id))?;

        let mut updated = current.clone();
        updated.total_charged = updated.total_charged.saturating_add(cost);
        updated.last_voucher = Some(voucher.clone());

        store
            .append(StoredVoucher::record(voucher, updated.consumer))
            .await?;
        store.put_channel(updated.clone()).await?;

        channels.insert(voucher.channel_id, updated.clone());
        debug!(
            "committed {} against channel 0x{}, total now {}",
            cost,
            hex::encode(voucher.channel_id.as_bytes()),
            updated.total_charged
        );
        Ok(updated)
    }
}
