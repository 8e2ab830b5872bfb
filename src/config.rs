//! Configuration for the provider engine.

use crate::engine::EngineSettings;
use crate::types::Error;
use crate::utils::crypto::VoucherDomain;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainConfig {
    /// JSON-RPC endpoint of the chain hosting the channel contract.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Chain id, bound into the voucher signing domain.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Address of the channel contract.
    #[serde(default)]
    pub contract: Address,

    /// Hex private key of the provider account. Claims are signed with it and
    /// vouchers for channels naming any other provider are rejected.
    #[serde(default)]
    pub provider_key: String,

    /// Typed-data domain name of the channel contract.
    #[serde(default = "default_domain_name")]
    pub domain_name: String,

    /// Typed-data domain version.
    #[serde(default = "default_domain_version")]
    pub domain_version: String,

    /// Location of the persisted voucher document.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Flat price charged per paid request, in the channel currency's
    /// smallest unit.
    #[serde(default = "default_price")]
    pub price_per_request: u64,

    /// Claim submission policy.
    #[serde(default)]
    pub claim: ClaimConfig,

    /// Auto-claim scheduler policy.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Claims below this amount are skipped unless forced.
    #[serde(default = "default_min_claim")]
    pub min_claim_amount: u64,

    /// Bound on every on-chain read and write.
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between scheduler ticks.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Channels expiring within this window are claimed regardless of the
    /// threshold. Operators should keep `interval_secs` plus worst-case RPC
    /// latency below this value.
    #[serde(default = "default_buffer")]
    pub expiry_buffer_secs: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            contract: Address::zero(),
            provider_key: String::new(),
            domain_name: default_domain_name(),
            domain_version: default_domain_version(),
            store_path: default_store_path(),
            price_per_request: default_price(),
            claim: ClaimConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            min_claim_amount: default_min_claim(),
            rpc_timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval(),
            expiry_buffer_secs: default_buffer(),
        }
    }
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8545".to_string()
}

const fn default_chain_id() -> u64 {
    1
}

fn default_domain_name() -> String {
    "DRAIN".to_string()
}

fn default_domain_version() -> String {
    "1".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("drain-vouchers.json")
}

const fn default_price() -> u64 {
    1_000
}

const fn default_min_claim() -> u64 {
    100_000
}

const fn default_rpc_timeout() -> u64 {
    30
}

const fn default_true() -> bool {
    true
}

const fn default_interval() -> u64 {
    300
}

const fn default_buffer() -> u64 {
    3_600
}

impl DrainConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: &std::path::Path) -> Result<(), Error> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The wallet behind `provider_key`.
    pub fn provider_wallet(&self) -> Result<LocalWallet, Error> {
        if self.provider_key.is_empty() {
            return Err(Error::Config("provider_key is not set".to_string()));
        }
        self.provider_key
            .parse::<LocalWallet>()
            .map(|w| w.with_chain_id(self.chain_id))
            .map_err(|e| Error::Config(format!("invalid provider key: {e}")))
    }

    pub fn domain(&self) -> VoucherDomain {
        VoucherDomain::new(
            self.domain_name.clone(),
            self.domain_version.clone(),
            self.chain_id,
            self.contract,
        )
    }

    pub fn engine_settings(&self) -> Result<EngineSettings, Error> {
        Ok(EngineSettings {
            provider: self.provider_wallet()?.address(),
            domain: self.domain(),
            min_claim_amount: U256::from(self.claim.min_claim_amount),
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.claim.rpc_timeout_secs)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }
}
