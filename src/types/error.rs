use crate::rpc::RpcError;
use crate::store::StoreError;
use axum::http::StatusCode;
use ethers::types::H256;
use serde::Serialize;
use thiserror::Error;

/// Why a voucher was rejected.
///
/// Rejections are expected outcomes, not process errors: the consumer can
/// always recover by issuing a fresh, correctly-funded voucher. Each variant
/// maps to a machine-readable code carried in the payment-required response.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    #[error("channel not found on-chain")]
    ChannelNotFound,
    #[error("channel belongs to a different provider")]
    WrongProvider,
    #[error("voucher amount does not cover charged total plus required charge")]
    InsufficientFunds,
    #[error("voucher amount exceeds channel deposit")]
    ExceedsDeposit,
    #[error("voucher nonce not greater than last accepted nonce")]
    InvalidNonce,
    #[error("voucher signature does not recover to channel consumer")]
    InvalidSignature,
}

impl RejectReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            RejectReason::ChannelNotFound => "channel_not_found",
            RejectReason::WrongProvider => "wrong_provider",
            RejectReason::InsufficientFunds => "insufficient_funds",
            RejectReason::ExceedsDeposit => "exceeds_deposit",
            RejectReason::InvalidNonce => "invalid_nonce",
            RejectReason::InvalidSignature => "invalid_signature",
        }
    }
}

impl From<RejectReason> for StatusCode {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::InvalidSignature => StatusCode::UNAUTHORIZED,
            RejectReason::ChannelNotFound
            | RejectReason::WrongProvider
            | RejectReason::InsufficientFunds
            | RejectReason::ExceedsDeposit
            | RejectReason::InvalidNonce => StatusCode::PAYMENT_REQUIRED,
        }
    }
}

/// Engine-level failures. Validation rejections never appear here.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid voucher payload: {0}")]
    InvalidVoucher(String),

    #[error("channel {0:?} not present in ledger")]
    UnknownChannel(H256),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
