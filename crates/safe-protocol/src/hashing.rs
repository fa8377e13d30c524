//! EIP-712 digest of a multisig transaction.
//!
//! The verifying contract recomputes exactly this value, so every byte of
//! the layout below is fixed:
//!
//! ```text
//! domainSeparator = keccak(DOMAIN_TYPEHASH || chainId || account)
//! structHash      = keccak(SAFE_TX_TYPEHASH || to || value || keccak(data) || operation
//!                          || safeTxGas || baseGas || gasPrice || gasToken
//!                          || refundReceiver || nonce)
//! digest          = keccak(0x19 || 0x01 || domainSeparator || structHash)
//! ```

use alloy_primitives::{Address, B256, U256};
use sha3::{Digest, Keccak256};

use crate::abi::{address_word, uint_word};
use crate::types::TransactionRequest;

/// EIP-712 domain type string, byte for byte.
pub const DOMAIN_TYPE: &str = "EIP712Domain(uint256 chainId,address verifyingContract)";

/// Transaction struct type string, byte for byte.
pub const SAFE_TX_TYPE: &str = "SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)";

/// Keccak-256 of arbitrary bytes.
pub fn keccak256(data: impl AsRef<[u8]>) -> B256 {
    B256::from_slice(&Keccak256::digest(data.as_ref()))
}

/// Computes the EIP-712 domain separator for an account on a chain.
pub fn domain_separator(account: Address, chain_id: u64) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(keccak256(DOMAIN_TYPE));
    hasher.update(uint_word(U256::from(chain_id)));
    hasher.update(address_word(&account));
    B256::from_slice(&hasher.finalize())
}

/// Computes the EIP-712 struct hash of a transaction request.
pub fn struct_hash(request: &TransactionRequest) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(keccak256(SAFE_TX_TYPE));
    hasher.update(address_word(&request.to()));
    hasher.update(uint_word(request.value()));
    hasher.update(keccak256(request.data()));
    hasher.update(uint_word(U256::from(request.operation().as_u8())));
    hasher.update(uint_word(request.safe_tx_gas()));
    hasher.update(uint_word(request.base_gas()));
    hasher.update(uint_word(request.gas_price()));
    hasher.update(address_word(&request.gas_token()));
    hasher.update(address_word(&request.refund_receiver()));
    hasher.update(uint_word(request.nonce()));
    B256::from_slice(&hasher.finalize())
}

/// Computes the canonical digest owners sign and the account verifies.
pub fn compute_transaction_hash(
    account: Address,
    chain_id: u64,
    request: &TransactionRequest,
) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update([0x19u8, 0x01]);
    hasher.update(domain_separator(account, chain_id));
    hasher.update(struct_hash(request));
    B256::from_slice(&hasher.finalize())
}

/// Applies the EIP-191 personal-message prefix to a 32-byte digest, the way
/// `eth_sign` backends do before signing.
pub fn eth_message_hash(digest: &B256) -> B256 {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(digest);
    B256::from_slice(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{encode_function_call, selector, AbiParam};
    use crate::address::parse_address;
    use crate::types::{Operation, RawTransactionRequest};

    const SEPOLIA: u64 = 11155111;

    fn account() -> Address {
        parse_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap()
    }

    fn erc20_transfer_request(nonce: u64) -> TransactionRequest {
        let token = parse_address("0xEDC9b422dC055939F63e9Dc808ACEc05B515C28e").unwrap();
        let recipient = parse_address("0x000000000000000000000000000000000000dEaD").unwrap();
        let calldata = encode_function_call(
            selector("transfer(address,uint256)"),
            &[
                AbiParam::Address(recipient),
                AbiParam::Uint256(U256::from(1_000_000u64)),
            ],
        );
        TransactionRequest::new(token, U256::ZERO, calldata, Operation::Call, U256::from(nonce))
    }

    #[test]
    fn type_hashes_match_contract_constants() {
        assert_eq!(
            hex::encode(keccak256(DOMAIN_TYPE)),
            "47e79534a245952e8b16893a336b85a3d9ea9fa8c573f3d803afb92a79469218"
        );
        assert_eq!(
            hex::encode(keccak256(SAFE_TX_TYPE)),
            "bb8310d486368db6bd6f849402fdd73ad53d316b5a4b2644ad6efe0f941286d8"
        );
    }

    #[test]
    fn keccak_of_empty_input() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn known_transaction_digests() {
        assert_eq!(
            hex::encode(compute_transaction_hash(account(), SEPOLIA, &erc20_transfer_request(5))),
            "efb380fc1b7e40d3309372c25bba580022baa961053a9bf0125fb86c1b3f7915"
        );

        let refund_receiver = parse_address("0x000000000000000000000000000000000000dEaD").unwrap();
        let with_gas = erc20_transfer_request(5).with_gas(
            U256::from(50_000u64),
            U256::from(21_000u64),
            U256::from(1_000_000_000u64),
            Address::ZERO,
            refund_receiver,
        );
        assert_eq!(
            hex::encode(compute_transaction_hash(account(), 1, &with_gas)),
            "b3dad57f798d4a769276b61b192c8e93bd8bbc808b57a63668aa50c7da3822c2"
        );

        let token = parse_address("0xEDC9b422dC055939F63e9Dc808ACEc05B515C28e").unwrap();
        let delegate = TransactionRequest::new(
            token,
            U256::from(7u64),
            Vec::<u8>::new(),
            Operation::DelegateCall,
            U256::ZERO,
        );
        assert_eq!(
            hex::encode(compute_transaction_hash(account(), SEPOLIA, &delegate)),
            "7827bf4c213e301fc5b3a835f07d21fb893ad2bded2df69a1495c9dc1ab0b9fe"
        );
    }

    #[test]
    fn digest_is_deterministic() {
        let request = erc20_transfer_request(5);
        let first = compute_transaction_hash(account(), SEPOLIA, &request);
        let second = compute_transaction_hash(account(), SEPOLIA, &request.clone());
        assert_eq!(first, second);
    }

    #[test]
    fn nonce_change_changes_digest() {
        let five = compute_transaction_hash(account(), SEPOLIA, &erc20_transfer_request(5));
        let six = compute_transaction_hash(account(), SEPOLIA, &erc20_transfer_request(6));
        assert_ne!(five, six);
    }

    #[test]
    fn every_field_affects_digest() {
        let base = erc20_transfer_request(5);
        let base_hash = compute_transaction_hash(account(), SEPOLIA, &base);
        let other = Address::repeat_byte(0x42);

        let variants = [
            TransactionRequest::new(other, base.value(), base.data().clone(), Operation::Call, base.nonce()),
            TransactionRequest::new(base.to(), U256::from(1u64), base.data().clone(), Operation::Call, base.nonce()),
            TransactionRequest::new(base.to(), base.value(), vec![0x01u8], Operation::Call, base.nonce()),
            TransactionRequest::new(base.to(), base.value(), base.data().clone(), Operation::DelegateCall, base.nonce()),
            base.with_gas(U256::from(1u64), U256::ZERO, U256::ZERO, Address::ZERO, Address::ZERO),
            base.with_gas(U256::ZERO, U256::from(1u64), U256::ZERO, Address::ZERO, Address::ZERO),
            base.with_gas(U256::ZERO, U256::ZERO, U256::from(1u64), Address::ZERO, Address::ZERO),
            base.with_gas(U256::ZERO, U256::ZERO, U256::ZERO, other, Address::ZERO),
            base.with_gas(U256::ZERO, U256::ZERO, U256::ZERO, Address::ZERO, other),
        ];

        for (i, variant) in variants.iter().enumerate() {
            assert_ne!(
                compute_transaction_hash(account(), SEPOLIA, variant),
                base_hash,
                "variant {i} should change the digest"
            );
        }
    }

    #[test]
    fn domain_binds_chain_and_account() {
        let request = erc20_transfer_request(5);
        let base = compute_transaction_hash(account(), SEPOLIA, &request);
        assert_ne!(base, compute_transaction_hash(account(), 1, &request));
        assert_ne!(
            base,
            compute_transaction_hash(Address::repeat_byte(0x01), SEPOLIA, &request)
        );
    }

    #[test]
    fn digest_matches_manual_preimage() {
        let request = erc20_transfer_request(5);
        let mut preimage = vec![0x19, 0x01];
        preimage.extend_from_slice(domain_separator(account(), SEPOLIA).as_slice());
        preimage.extend_from_slice(struct_hash(&request).as_slice());
        assert_eq!(preimage.len(), 66);
        assert_eq!(
            keccak256(&preimage),
            compute_transaction_hash(account(), SEPOLIA, &request)
        );
    }

    #[test]
    fn parsed_and_built_requests_hash_identically() {
        let built = erc20_transfer_request(5);
        let raw = RawTransactionRequest {
            to: "0xedc9b422dc055939f63e9dc808acec05b515c28e".into(),
            data: format!("0x{}", hex::encode(built.data())),
            nonce: "0x5".into(),
            ..Default::default()
        };
        let parsed = TransactionRequest::parse(&raw).unwrap();
        assert_eq!(
            compute_transaction_hash(account(), SEPOLIA, &parsed),
            compute_transaction_hash(account(), SEPOLIA, &built)
        );
    }
}
