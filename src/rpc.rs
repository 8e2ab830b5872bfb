//! Blockchain RPC collaborator.
//!
//! The engine only ever talks to the channel contract through [`ChannelRpc`];
//! the ethers-backed implementation lives here, tests inject a scripted mock.

use crate::types::{Error, OnChainChannel};
use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature, TransactionRequest, H256, U256};
use ethers::utils::id;
use std::time::Duration;
use thiserror::Error as ThisError;
use tracing::debug;

/// Named errors the channel contract reverts with. A revert carrying one of
/// these names is deterministic and will never succeed on retry.
pub const CONTRACT_ERROR_NAMES: &[&str] = &[
    "InvalidAmount",
    "AlreadyClaimed",
    "ChannelNotFound",
    "InvalidSignature",
    "WrongProvider",
    "NotExpired",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorKind {
    /// The call did not complete within the configured bound.
    Timeout,
    /// Transport-level failure (connection refused, bad response, gas or
    /// nonce contention at submission).
    Transport,
    /// The contract reverted the call.
    Revert,
}

/// Structured RPC failure. `name` carries the contract's named error when one
/// could be extracted; the claim submitter uses it for permanent/transient
/// classification.
#[derive(Debug, Clone, ThisError)]
#[error("{message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
    pub name: Option<String>,
}

impl RpcError {
    pub fn timeout(op: &str) -> Self {
        Self {
            kind: RpcErrorKind::Timeout,
            message: format!("{op} timed out"),
            name: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: RpcErrorKind::Transport,
            message: message.into(),
            name: None,
        }
    }

    pub fn revert(message: impl Into<String>, name: Option<String>) -> Self {
        Self {
            kind: RpcErrorKind::Revert,
            message: message.into(),
            name,
        }
    }
}

/// Scan an error message for one of the contract's named errors.
pub(crate) fn extract_named_error(message: &str) -> Option<String> {
    CONTRACT_ERROR_NAMES
        .iter()
        .find(|name| message.contains(*name))
        .map(|name| (*name).to_string())
}

fn classify_call_error(message: String) -> RpcError {
    let name = extract_named_error(&message);
    if name.is_some() || message.to_ascii_lowercase().contains("revert") {
        RpcError::revert(message, name)
    } else {
        RpcError::transport(message)
    }
}

/// The channel contract operations the provider needs.
#[async_trait]
pub trait ChannelRpc: Send + Sync {
    /// Read the channel record; a never-opened channel comes back zeroed.
    async fn read_channel(&self, channel_id: H256) -> Result<OnChainChannel, RpcError>;

    /// Remaining claimable balance of the channel.
    async fn read_balance(&self, channel_id: H256) -> Result<U256, RpcError>;

    /// Submit a claim transaction, returning its hash once accepted into the
    /// node's mempool.
    async fn submit_claim(
        &self,
        channel_id: H256,
        amount: U256,
        nonce: U256,
        signature: Signature,
    ) -> Result<H256, RpcError>;
}

/// ethers-backed implementation talking to the channel contract over HTTP.
pub struct EthersChannelRpc {
    client: SignerMiddleware<Provider<Http>, LocalWallet>,
    contract: Address,
    timeout: Duration,
}

impl EthersChannelRpc {
    pub fn connect(
        rpc_url: &str,
        chain_id: u64,
        contract: Address,
        provider_key: &str,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| Error::Config(format!("invalid rpc url {rpc_url}: {e}")))?;
        let wallet: LocalWallet = provider_key
            .parse()
            .map_err(|e| Error::Config(format!("invalid provider key: {e}")))?;
        let wallet = wallet.with_chain_id(chain_id);

        Ok(Self {
            client: SignerMiddleware::new(provider, wallet),
            contract,
            timeout,
        })
    }

    /// The account this process signs claims with.
    pub fn provider_address(&self) -> Address {
        self.client.signer().address()
    }

    async fn call(&self, data: Vec<u8>, outputs: &[ParamType]) -> Result<Vec<Token>, RpcError> {
        let tx: TypedTransaction = TransactionRequest::new()
            .to(self.contract)
            .data(data)
            .into();

        let bytes = match tokio::time::timeout(self.timeout, self.client.call(&tx, None)).await {
            Err(_) => return Err(RpcError::timeout("eth_call")),
            Ok(Err(e)) => return Err(classify_call_error(e.to_string())),
            Ok(Ok(bytes)) => bytes,
        };

        abi::decode(outputs, &bytes)
            .map_err(|e| RpcError::transport(format!("undecodable contract return: {e}")))
    }
}

#[async_trait]
impl ChannelRpc for EthersChannelRpc {
    async fn read_channel(&self, channel_id: H256) -> Result<OnChainChannel, RpcError> {
        let data = [
            id("getChannel(bytes32)").to_vec(),
            abi::encode(&[Token::FixedBytes(channel_id.as_bytes().to_vec())]),
        ]
        .concat();

        let outputs = [
            ParamType::Address,
            ParamType::Address,
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Uint(256),
        ];
        let tokens = self.call(data, &outputs).await?;

        let shape = || RpcError::transport("unexpected getChannel return shape");
        let consumer = tokens[0].clone().into_address().ok_or_else(shape)?;
        let provider = tokens[1].clone().into_address().ok_or_else(shape)?;
        let deposit = tokens[2].clone().into_uint().ok_or_else(shape)?;
        let claimed = tokens[3].clone().into_uint().ok_or_else(shape)?;
        let expiry = tokens[4].clone().into_uint().ok_or_else(shape)?;

        Ok(OnChainChannel {
            consumer,
            provider,
            deposit,
            claimed,
            expiry: expiry.low_u64(),
        })
    }

    async fn read_balance(&self, channel_id: H256) -> Result<U256, RpcError> {
        let data = [
            id("channelBalance(bytes32)").to_vec(),
            abi::encode(&[Token::FixedBytes(channel_id.as_bytes().to_vec())]),
        ]
        .concat();

        let tokens = self.call(data, &[ParamType::Uint(256)]).await?;
        tokens[0]
            .clone()
            .into_uint()
            .ok_or_else(|| RpcError::transport("unexpected channelBalance return shape"))
    }

    async fn submit_claim(
        &self,
        channel_id: H256,
        amount: U256,
        nonce: U256,
        signature: Signature,
    ) -> Result<H256, RpcError> {
        let data = [
            id("claim(bytes32,uint256,uint256,bytes)").to_vec(),
            abi::encode(&[
                Token::FixedBytes(channel_id.as_bytes().to_vec()),
                Token::Uint(amount),
                Token::Uint(nonce),
                Token::Bytes(signature.to_vec()),
            ]),
        ]
        .concat();

        let tx = TransactionRequest::new().to(self.contract).data(data);

        let fut = self.client.send_transaction(tx, None);
        let pending = match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => return Err(RpcError::timeout("claim submission")),
            Ok(Err(e)) => return Err(classify_call_error(e.to_string())),
            Ok(Ok(pending)) => pending,
        };

        let tx_hash = *pending;
        debug!(
            "submitted claim for channel 0x{} in tx {:?}",
            hex::encode(channel_id.as_bytes()),
            tx_hash
        );
        Ok(tx_hash)
    }
}
