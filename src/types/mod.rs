pub mod channel;
pub mod error;

pub use channel::{ChannelState, OnChainChannel, StoredVoucher, Voucher};
pub use error::{Error, RejectReason};
