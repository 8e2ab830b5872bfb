//! Single-document JSON persistence.
//!
//! The whole store is one serialized document, re-read atomically at open and
//! rewritten atomically (temp file + rename) on every mutation. Simple and
//! fits the write rates of a payment gate; the trait boundary leaves room for
//! an embedded key-value store later without touching callers.

use super::{StoreDocument, StoreError, StoreStats, VoucherStore};
use crate::types::{ChannelState, StoredVoucher};
use async_trait::async_trait;
use ethers::types::H256;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl JsonFileStore {
    /// Open the store, loading the existing document if one is present.
    ///
    /// A present-but-unparseable document is an error: losing the voucher
    /// history silently would forfeit claimable revenue.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(StoreError::Io(e)),
        };

        info!("voucher store opened at {}", path.display());
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, doc: &StoreDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| StoreError::Corrupt(format!("serialize: {e}")))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl VoucherStore for JsonFileStore {
    async fn append(&self, voucher: StoredVoucher) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        next.append(voucher);
        self.persist(&next)?;
        *doc = next;
        Ok(())
    }

    async fn get_channel(&self, channel_id: H256) -> Result<Option<ChannelState>, StoreError> {
        Ok(self.doc.lock().await.channels.get(&channel_id).cloned())
    }

    async fn put_channel(&self, state: ChannelState) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        next.channels.insert(state.channel_id, state);
        self.persist(&next)?;
        *doc = next;
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
        let mut doc = self.doc.lock().await;
        let mut next = doc.clone();
        let changed = next.mark_claimed(channel_id, tx_hash);
        if changed > 0 {
            self.persist(&next)?;
            *doc = next;
        }
        Ok(changed)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(self.doc.lock().await.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Voucher;
    use crate::utils::crypto::VoucherDomain;
    use ethers::signers::LocalWallet;
    use ethers::types::{Address, U256};
    use std::str::FromStr;

    fn signed_voucher(channel_id: H256, amount: u64, nonce: u64) -> Voucher {
        let wallet = LocalWallet::from_str(
            "1234567890123456789012345678901234567890123456789012345678901234",
        )
        .unwrap();
        let domain = VoucherDomain::new("DRAIN", "1", 31337, Address::repeat_byte(0x11));
        domain
            .sign_voucher(&wallet, channel_id, U256::from(amount), U256::from(nonce))
            .unwrap()
    }

    #[tokio::test]
    async fn reload_reconstructs_identical_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vouchers.json");

        let channel_id = H256::repeat_byte(0x01);
        let voucher = signed_voucher(channel_id, 100_000, 1);
        let state = ChannelState {
            channel_id,
            consumer: Address::repeat_byte(0xaa),
            provider: Address::repeat_byte(0xbb),
            deposit: U256::from(1_000_000u64),
            expiry: 1_900_000_000,
            total_charged: U256::from(100_000u64),
            last_voucher: Some(voucher.clone()),
        };

        {
            let store = JsonFileStore::open(&path).unwrap();
            store
                .append(StoredVoucher::record(&voucher, state.consumer))
                .await
                .unwrap();
            store.put_channel(state.clone()).await.unwrap();
        }

        // Fresh open simulates a process restart.
        let store = JsonFileStore::open(&path).unwrap();
        let reloaded = store.get_channel(channel_id).await.unwrap().unwrap();
        assert_eq!(reloaded, state);

        let unclaimed = store.list_unclaimed().await.unwrap();
        assert_eq!(unclaimed.len(), 1);
        assert_eq!(unclaimed[0].voucher(), voucher);
    }

    #[tokio::test]
    async fn claim_mark_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vouchers.json");

        let channel_id = H256::repeat_byte(0x02);
        let voucher = signed_voucher(channel_id, 50_000, 1);
        let tx = H256::repeat_byte(0x42);

        {
            let store = JsonFileStore::open(&path).unwrap();
            store
                .append(StoredVoucher::record(&voucher, Address::repeat_byte(0xaa)))
                .await
                .unwrap();
            store.mark_claimed(channel_id, Some(tx)).await.unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert!(store.list_unclaimed().await.unwrap().is_empty());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_vouchers, 1);
        assert_eq!(stats.unclaimed_count, 0);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("fresh.json")).unwrap();
        assert_eq!(store.stats().await.unwrap(), StoreStats::default());
    }

    #[test]
    fn corrupt_document_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vouchers.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Corrupt(_))
        ));
    }
}
