//! Claim submission.
//!
//! Converts the ledger's highest unclaimed voucher per channel into an
//! on-chain settlement transaction. Failures are classified: a revert
//! carrying one of the contract's named errors is deterministic, so the
//! voucher is dead-lettered rather than retried forever; everything else is
//! transient and retried on the next scheduler tick or manual trigger.

use crate::engine::DrainEngine;
use crate::rpc::{RpcError, RpcErrorKind};
use crate::types::Error;
use crate::utils::unix_now;
use ethers::types::H256;
use serde::Serialize;
use tracing::{error, info, warn};

/// What happened to one channel's claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A claim transaction was submitted.
    Submitted(H256),
    /// The channel's remaining on-chain balance was already zero; the voucher
    /// was marked claimed without spending gas.
    AlreadySettled,
    /// The contract rejected the claim with a named, deterministic error; the
    /// voucher was dead-lettered.
    DeadLettered(String),
    /// Unclaimed amount below the configured threshold and no force given.
    BelowThreshold,
    /// No unclaimed voucher for this channel.
    NothingToClaim,
}

/// Summary of a claim sweep, reported to operators. Partial failures are
/// counted, never silently swallowed.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReport {
    pub attempted: u64,
    pub tx_hashes: Vec<H256>,
    pub settled: u64,
    pub dead_lettered: u64,
    pub skipped: u64,
    pub transient_failures: u64,
}

impl ClaimReport {
    fn absorb(&mut self, outcome: &ClaimOutcome) {
        match outcome {
            ClaimOutcome::Submitted(tx) => self.tx_hashes.push(*tx),
            ClaimOutcome::AlreadySettled => self.settled += 1,
            ClaimOutcome::DeadLettered(_) => self.dead_lettered += 1,
            ClaimOutcome::BelowThreshold | ClaimOutcome::NothingToClaim => self.skipped += 1,
        }
    }
}

/// A claim error is permanent exactly when the contract reverted with one of
/// its named errors — those never succeed on retry. Timeouts, transport
/// failures and anonymous reverts are retried.
fn is_permanent(err: &RpcError) -> bool {
    err.kind == RpcErrorKind::Revert && err.name.is_some()
}

impl DrainEngine {
    /// Attempt to settle one channel's highest unclaimed voucher.
    ///
    /// `Err` is returned only for transient failures (and store faults); the
    /// voucher stays unclaimed and is retried later.
    pub async fn claim_channel(&self, channel_id: H256, force: bool) -> Result<ClaimOutcome, Error> {
        let Some(stored) = self.store.highest_unclaimed(channel_id).await? else {
            return Ok(ClaimOutcome::NothingToClaim);
        };

        if !force && stored.amount < self.settings.min_claim_amount {
            return Ok(ClaimOutcome::BelowThreshold);
        }

        // Best-effort pre-check: if the channel already has nothing left
        // on-chain (consumer withdrew after expiry, or a claim landed outside
        // our view), submitting would only waste gas.
        match self.rpc.read_balance(channel_id).await {
            Ok(balance) if balance.is_zero() => {
                self.store.mark_claimed(channel_id, None).await?;
                info!(
                    "channel 0x{} already drained on-chain, marked settled locally",
                    hex::encode(channel_id.as_bytes())
                );
                return Ok(ClaimOutcome::AlreadySettled);
            }
            Ok(_) => {}
            Err(e) => {
                warn!(
                    "balance pre-check failed for channel 0x{}: {} (submitting anyway)",
                    hex::encode(channel_id.as_bytes()),
                    e
                );
            }
        }

        let submission = self
            .rpc
            .submit_claim(channel_id, stored.amount, stored.nonce, stored.signature)
            .await;

        match submission {
            Ok(tx_hash) => {
                self.rpc_healthy
                    .store(true, std::sync::atomic::Ordering::SeqCst);
                self.store.mark_claimed(channel_id, Some(tx_hash)).await?;
                info!(
                    "claimed {} from channel 0x{} in tx {:?}",
                    stored.amount,
                    hex::encode(channel_id.as_bytes()),
                    tx_hash
                );
                Ok(ClaimOutcome::Submitted(tx_hash))
            }
            Err(e) if is_permanent(&e) => {
                let name = e.name.clone().unwrap_or_default();
                // Dead-letter: retrying would fail identically forever and
                // blind the operator to a real balance loss.
                self.store.mark_claimed(channel_id, None).await?;
                error!(
                    "permanent claim failure for channel 0x{} ({}): voucher for {} dead-lettered",
                    hex::encode(channel_id.as_bytes()),
                    name,
                    stored.amount
                );
                Ok(ClaimOutcome::DeadLettered(name))
            }
            Err(e) => {
                if e.kind != RpcErrorKind::Revert {
                    self.rpc_healthy
                        .store(false, std::sync::atomic::Ordering::SeqCst);
                }
                warn!(
                    "transient claim failure for channel 0x{}: {} (will retry)",
                    hex::encode(channel_id.as_bytes()),
                    e
                );
                Err(Error::Rpc(e))
            }
        }
    }

    /// Settle every channel holding an unclaimed voucher.
    pub async fn trigger_claims(&self, force: bool) -> Result<ClaimReport, Error> {
        let candidates = self.store.highest_per_channel().await?;
        let mut report = ClaimReport {
            attempted: candidates.len() as u64,
            ..ClaimReport::default()
        };

        for channel_id in candidates.into_keys() {
            match self.claim_channel(channel_id, force).await {
                Ok(outcome) => report.absorb(&outcome),
                Err(e) => {
                    report.transient_failures += 1;
                    warn!(
                        "claim sweep: channel 0x{} failed: {}",
                        hex::encode(channel_id.as_bytes()),
                        e
                    );
                }
            }
        }

        info!(
            "claim sweep: {} attempted, {} submitted, {} settled, {} dead-lettered, {} skipped, {} failed",
            report.attempted,
            report.tx_hashes.len(),
            report.settled,
            report.dead_lettered,
            report.skipped,
            report.transient_failures
        );
        Ok(report)
    }

    /// Force-claim every channel whose expiry falls within `buffer_secs`.
    ///
    /// This closes the race against consumer-initiated withdrawal: once the
    /// channel expires, the consumer can reclaim everything unclaimed, so
    /// near-expiry channels are settled regardless of the normal threshold.
    pub async fn trigger_expiring_claims(&self, buffer_secs: u64) -> Result<ClaimReport, Error> {
        let expiring = self.ledger.expiring(unix_now(), buffer_secs).await;
        let mut report = ClaimReport {
            attempted: expiring.len() as u64,
            ..ClaimReport::default()
        };

        for channel_id in expiring {
            match self.claim_channel(channel_id, true).await {
                Ok(outcome) => {
                    if let ClaimOutcome::Submitted(_) = outcome {
                        info!(
                            "expiry-buffer claim submitted for channel 0x{}",
                            hex::encode(channel_id.as_bytes())
                        );
                    }
                    report.absorb(&outcome);
                }
                Err(e) => {
                    report.transient_failures += 1;
                    warn!(
                        "expiry-buffer claim for channel 0x{} failed: {}",
                        hex::encode(channel_id.as_bytes()),
                        e
                    );
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::Harness;
    use crate::rpc::RpcError;
    use ethers::types::U256;

    const FAR_EXPIRY: u64 = 4_000_000_000;

    /// Accept and commit one voucher so the store holds an unclaimed record.
    async fn committed_channel(h: &Harness, byte: u8, amount: u64) -> H256 {
        let id = H256::repeat_byte(byte);
        h.open_channel(id, 1_000_000, FAR_EXPIRY);
        let voucher = h.voucher(id, amount, 1);
        assert!(h.engine.validate(&voucher, U256::from(amount)).await.is_accepted());
        h.engine.commit(&voucher, U256::from(amount)).await.unwrap();
        id
    }

    #[tokio::test]
    async fn submits_and_marks_claimed() {
        let h = Harness::new(0);
        let id = committed_channel(&h, 1, 100_000).await;

        let outcome = h.engine.claim_channel(id, false).await.unwrap();
        assert!(matches!(outcome, ClaimOutcome::Submitted(_)));
        assert_eq!(h.rpc.submitted_claims().len(), 1);

        let stored = h.engine.store.list_unclaimed().await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn below_threshold_skipped_unless_forced() {
        let h = Harness::new(500_000);
        let id = committed_channel(&h, 1, 100_000).await;

        assert_eq!(
            h.engine.claim_channel(id, false).await.unwrap(),
            ClaimOutcome::BelowThreshold
        );
        assert!(h.rpc.submitted_claims().is_empty());

        assert!(matches!(
            h.engine.claim_channel(id, true).await.unwrap(),
            ClaimOutcome::Submitted(_)
        ));
    }

    #[tokio::test]
    async fn zero_balance_settles_without_transaction() {
        let h = Harness::new(0);
        let id = committed_channel(&h, 1, 100_000).await;
        h.rpc.set_balance(id, U256::zero());

        assert_eq!(
            h.engine.claim_channel(id, false).await.unwrap(),
            ClaimOutcome::AlreadySettled
        );
        assert!(h.rpc.submitted_claims().is_empty());
        assert!(h.engine.store.list_unclaimed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn named_error_dead_letters_the_voucher() {
        let h = Harness::new(0);
        let id = committed_channel(&h, 1, 100_000).await;
        h.rpc.queue_submit(Err(RpcError::revert(
            "execution reverted: InvalidAmount",
            Some("InvalidAmount".to_string()),
        )));

        let outcome = h.engine.claim_channel(id, false).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::DeadLettered("InvalidAmount".to_string()));

        // Dead-lettered: claimed with no transaction reference, excluded from
        // every future attempt.
        let doc_stats = h.engine.store.stats().await.unwrap();
        assert_eq!(doc_stats.unclaimed_count, 0);
        assert_eq!(
            h.engine.claim_channel(id, true).await.unwrap(),
            ClaimOutcome::NothingToClaim
        );
    }

    #[tokio::test]
    async fn transient_error_leaves_voucher_for_retry() {
        let h = Harness::new(0);
        let id = committed_channel(&h, 1, 100_000).await;
        h.rpc
            .queue_submit(Err(RpcError::transport("connection refused")));

        let result = h.engine.claim_channel(id, false).await;
        assert!(result.is_err());
        assert_eq!(h.engine.store.stats().await.unwrap().unclaimed_count, 1);

        // Next attempt (queue exhausted, default success) goes through.
        assert!(matches!(
            h.engine.claim_channel(id, false).await.unwrap(),
            ClaimOutcome::Submitted(_)
        ));
    }

    #[tokio::test]
    async fn trigger_claims_is_idempotent() {
        let h = Harness::new(0);
        committed_channel(&h, 1, 100_000).await;
        committed_channel(&h, 2, 200_000).await;

        let report = h.engine.trigger_claims(false).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.tx_hashes.len(), 2);

        // Everything already claimed: the second sweep submits nothing.
        let report = h.engine.trigger_claims(false).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert!(report.tx_hashes.is_empty());
        assert_eq!(h.rpc.submitted_claims().len(), 2);
    }

    #[tokio::test]
    async fn sweep_counts_partial_failures() {
        let h = Harness::new(0);
        committed_channel(&h, 1, 100_000).await;
        committed_channel(&h, 2, 200_000).await;
        h.rpc
            .queue_submit(Err(RpcError::transport("nonce too low")));

        let report = h.engine.trigger_claims(false).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.tx_hashes.len(), 1);
        assert_eq!(report.transient_failures, 1);
    }

    #[tokio::test]
    async fn expiring_claims_ignore_threshold() {
        // Threshold far above the voucher amount, expiry inside the buffer:
        // the claim goes out anyway.
        let h = Harness::new(u64::MAX);
        let id = H256::repeat_byte(1);
        let expiry = crate::utils::unix_now() + 1_800;
        h.open_channel(id, 1_000_000, expiry);
        let voucher = h.voucher(id, 100_000, 1);
        h.engine.validate(&voucher, U256::from(100_000u64)).await;
        h.engine.commit(&voucher, U256::from(100_000u64)).await.unwrap();

        let report = h.engine.trigger_expiring_claims(3_600).await.unwrap();
        assert_eq!(report.tx_hashes.len(), 1);

        // A distant channel is untouched by the same buffer.
        let far = committed_channel(&h, 2, 100_000).await;
        let report = h.engine.trigger_expiring_claims(3_600).await.unwrap();
        assert_eq!(report.tx_hashes.len(), 0);
        assert!(h
            .engine
            .store
            .highest_unclaimed(far)
            .await
            .unwrap()
            .is_some());
    }
}
