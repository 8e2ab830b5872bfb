//! Typed-data signing scheme for vouchers.
//!
//! Vouchers are signed under EIP-712 with a domain bound to the channel
//! contract (name, version, chain id, verifying contract), so a voucher for
//! one deployment can never be replayed against another.

use crate::types::Voucher;
use ethers::abi::{encode, Token};
use ethers::signers::{LocalWallet, WalletError};
use ethers::types::{Address, RecoveryMessage, SignatureError, H256, U256};
use ethers::utils::keccak256;

const DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";
const VOUCHER_TYPE: &str = "Voucher(bytes32 channelId,uint256 amount,uint256 nonce)";

/// The typed-data domain of the channel contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoucherDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl VoucherDomain {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        chain_id: u64,
        verifying_contract: Address,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            chain_id,
            verifying_contract,
        }
    }

    fn separator(&self) -> H256 {
        let encoded = encode(&[
            Token::FixedBytes(keccak256(DOMAIN_TYPE.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.name.as_bytes()).to_vec()),
            Token::FixedBytes(keccak256(self.version.as_bytes()).to_vec()),
            Token::Uint(U256::from(self.chain_id)),
            Token::Address(self.verifying_contract),
        ]);
        H256::from(keccak256(encoded))
    }

    /// The EIP-712 digest a consumer signs for the given voucher fields.
    pub fn voucher_digest(&self, channel_id: H256, amount: U256, nonce: U256) -> H256 {
        let struct_hash = keccak256(encode(&[
            Token::FixedBytes(keccak256(VOUCHER_TYPE.as_bytes()).to_vec()),
            Token::FixedBytes(channel_id.as_bytes().to_vec()),
            Token::Uint(amount),
            Token::Uint(nonce),
        ]));

        let mut buf = Vec::with_capacity(66);
        buf.extend_from_slice(&[0x19, 0x01]);
        buf.extend_from_slice(self.separator().as_bytes());
        buf.extend_from_slice(&struct_hash);
        H256::from(keccak256(buf))
    }

    /// Recover the address that signed the voucher.
    pub fn recover(&self, voucher: &Voucher) -> Result<Address, SignatureError> {
        let digest = self.voucher_digest(voucher.channel_id, voucher.amount, voucher.nonce);
        voucher.signature.recover(RecoveryMessage::Hash(digest))
    }

    /// Produce a signed voucher. Used by tests and consumer-side harnesses.
    pub fn sign_voucher(
        &self,
        wallet: &LocalWallet,
        channel_id: H256,
        amount: U256,
        nonce: U256,
    ) -> Result<Voucher, WalletError> {
        let digest = self.voucher_digest(channel_id, amount, nonce);
        let signature = wallet.sign_hash(digest)?;
        Ok(Voucher {
            channel_id,
            amount,
            nonce,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;
    use std::str::FromStr;

    fn test_wallet() -> LocalWallet {
        LocalWallet::from_str("1234567890123456789012345678901234567890123456789012345678901234")
            .unwrap()
    }

    fn test_domain() -> VoucherDomain {
        VoucherDomain::new("DRAIN", "1", 31337, Address::repeat_byte(0x11))
    }

    #[test]
    fn sign_then_recover_round_trip() {
        let wallet = test_wallet();
        let domain = test_domain();
        let voucher = domain
            .sign_voucher(
                &wallet,
                H256::repeat_byte(0x01),
                U256::from(100_000u64),
                U256::one(),
            )
            .unwrap();

        let recovered = domain.recover(&voucher).unwrap();
        assert_eq!(recovered, wallet.address());
    }

    #[test]
    fn tampered_amount_recovers_different_signer() {
        let wallet = test_wallet();
        let domain = test_domain();
        let mut voucher = domain
            .sign_voucher(
                &wallet,
                H256::repeat_byte(0x01),
                U256::from(100_000u64),
                U256::one(),
            )
            .unwrap();

        voucher.amount = U256::from(900_000u64);
        let recovered = domain.recover(&voucher).unwrap();
        assert_ne!(recovered, wallet.address());
    }

    #[test]
    fn digest_is_domain_bound() {
        let domain = test_domain();
        let other_chain = VoucherDomain::new("DRAIN", "1", 1, Address::repeat_byte(0x11));
        let other_contract = VoucherDomain::new("DRAIN", "1", 31337, Address::repeat_byte(0x22));

        let id = H256::repeat_byte(0x01);
        let amount = U256::from(100_000u64);
        let nonce = U256::one();

        let digest = domain.voucher_digest(id, amount, nonce);
        assert_ne!(digest, other_chain.voucher_digest(id, amount, nonce));
        assert_ne!(digest, other_contract.voucher_digest(id, amount, nonce));
    }

    #[test]
    fn digest_covers_every_field() {
        let domain = test_domain();
        let base = domain.voucher_digest(H256::repeat_byte(0x01), U256::from(5u64), U256::one());

        assert_ne!(
            base,
            domain.voucher_digest(H256::repeat_byte(0x02), U256::from(5u64), U256::one())
        );
        assert_ne!(
            base,
            domain.voucher_digest(H256::repeat_byte(0x01), U256::from(6u64), U256::one())
        );
        assert_ne!(
            base,
            domain.voucher_digest(H256::repeat_byte(0x01), U256::from(5u64), U256::from(2u64))
        );
    }
}
