//! Counterfactual account addresses (CREATE2).
//!
//! Two factory families are supported and kept apart on purpose since they
//! salt differently:
//!
//! - [`ProxyFactoryDeployment`]: `createProxyWithNonce(singleton, initializer, saltNonce)`,
//!   `salt = keccak(keccak(initializer) || saltNonce)`.
//! - [`CloneFactoryDeployment`]: EIP-1167 minimal proxies,
//!   `salt = keccak(deployer || rawSalt)`.
//!
//! Both end in `address = keccak(0xff || factory || salt || initCodeHash)[12..]`.

use alloy_primitives::{Address, Bytes, B256, U256};
use sha3::{Digest, Keccak256};

use crate::abi::{self, address_word, uint_word, AbiParam};
use crate::error::SafeError;
use crate::hashing::keccak256;

/// Canonical signature of the account initializer.
pub const SETUP_SIGNATURE: &str =
    "setup(address[],uint256,address,bytes,address,address,uint256,address)";

/// EIP-1167 creation code before the implementation address.
const MINIMAL_PROXY_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d,
    0x3d, 0x3d, 0x36, 0x3d, 0x73,
];

/// EIP-1167 creation code after the implementation address.
const MINIMAL_PROXY_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// CREATE2 address: last 20 bytes of `keccak(0xff || deployer || salt || initCodeHash)`.
pub fn create2_address(deployer: Address, salt: B256, init_code_hash: B256) -> Address {
    let mut hasher = Keccak256::new();
    hasher.update([0xffu8]);
    hasher.update(deployer.as_slice());
    hasher.update(salt.as_slice());
    hasher.update(init_code_hash.as_slice());
    Address::from_slice(&hasher.finalize()[12..])
}

/// Parameters of the account's `setup` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeSetup {
    owners: Vec<Address>,
    threshold: usize,
    to: Address,
    data: Bytes,
    fallback_handler: Address,
    payment_token: Address,
    payment: U256,
    payment_receiver: Address,
}

impl SafeSetup {
    /// Owners keep the order given; it is the on-chain owner list order.
    pub fn new(owners: Vec<Address>, threshold: usize) -> Result<Self, SafeError> {
        if owners.is_empty() {
            return Err(SafeError::Validation("at least one owner is required".into()));
        }
        for (i, owner) in owners.iter().enumerate() {
            if *owner == Address::ZERO {
                return Err(SafeError::Validation("owner cannot be the zero address".into()));
            }
            if owners[..i].contains(owner) {
                return Err(SafeError::Validation(format!("duplicate owner {owner}")));
            }
        }
        if threshold == 0 || threshold > owners.len() {
            return Err(SafeError::Validation(format!(
                "threshold {threshold} out of range for {} owners",
                owners.len()
            )));
        }

        Ok(Self {
            owners,
            threshold,
            to: Address::ZERO,
            data: Bytes::new(),
            fallback_handler: Address::ZERO,
            payment_token: Address::ZERO,
            payment: U256::ZERO,
            payment_receiver: Address::ZERO,
        })
    }

    pub fn with_fallback_handler(mut self, handler: Address) -> Self {
        self.fallback_handler = handler;
        self
    }

    /// Optional delegate call made during setup (module enablement and the like).
    pub fn with_setup_call(mut self, to: Address, data: impl Into<Bytes>) -> Self {
        self.to = to;
        self.data = data.into();
        self
    }

    pub fn with_payment(mut self, token: Address, payment: U256, receiver: Address) -> Self {
        self.payment_token = token;
        self.payment = payment;
        self.payment_receiver = receiver;
        self
    }

    pub fn owners(&self) -> &[Address] {
        &self.owners
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// ABI-encoded `setup(...)` call data.
    pub fn initializer(&self) -> Bytes {
        let params = [
            AbiParam::AddressArray(self.owners.clone()),
            AbiParam::Uint256(U256::from(self.threshold)),
            AbiParam::Address(self.to),
            AbiParam::Bytes(self.data.to_vec()),
            AbiParam::Address(self.fallback_handler),
            AbiParam::Address(self.payment_token),
            AbiParam::Uint256(self.payment),
            AbiParam::Address(self.payment_receiver),
        ];
        abi::encode_function_call(abi::selector(SETUP_SIGNATURE), &params).into()
    }
}

/// A standard proxy factory together with the singleton it clones and the
/// proxy creation code it deploys (as returned by the factory's
/// `proxyCreationCode()`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyFactoryDeployment {
    pub factory: Address,
    pub singleton: Address,
    pub proxy_creation_code: Bytes,
}

impl ProxyFactoryDeployment {
    /// `keccak(keccak(initializer) || saltNonce)`.
    pub fn salt(initializer: &[u8], salt_nonce: U256) -> B256 {
        let mut preimage = [0u8; 64];
        preimage[..32].copy_from_slice(keccak256(initializer).as_slice());
        preimage[32..].copy_from_slice(&uint_word(salt_nonce));
        keccak256(preimage)
    }

    /// `keccak(creationCode || singleton as a 32-byte word)`.
    pub fn init_code_hash(&self) -> B256 {
        let mut hasher = Keccak256::new();
        hasher.update(&self.proxy_creation_code[..]);
        hasher.update(address_word(&self.singleton));
        B256::from_slice(&hasher.finalize())
    }

    /// Predicts the address for a raw initializer.
    pub fn predict_with_initializer(&self, initializer: &[u8], salt_nonce: U256) -> Address {
        create2_address(
            self.factory,
            Self::salt(initializer, salt_nonce),
            self.init_code_hash(),
        )
    }

    /// Predicts the address of an account created with `setup`.
    pub fn predict(&self, setup: &SafeSetup, salt_nonce: U256) -> Address {
        self.predict_with_initializer(&setup.initializer(), salt_nonce)
    }
}

/// An EIP-1167 clone factory deploying minimal proxies to `implementation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloneFactoryDeployment {
    pub factory: Address,
    pub implementation: Address,
}

impl CloneFactoryDeployment {
    /// `keccak(deployer (20 bytes) || rawSalt)`.
    pub fn salt(deployer: Address, raw_salt: B256) -> B256 {
        let mut preimage = [0u8; 52];
        preimage[..20].copy_from_slice(deployer.as_slice());
        preimage[20..].copy_from_slice(raw_salt.as_slice());
        keccak256(preimage)
    }

    /// EIP-1167 creation code for `implementation`.
    pub fn init_code(&self) -> Vec<u8> {
        let mut code = Vec::with_capacity(55);
        code.extend_from_slice(&MINIMAL_PROXY_PREFIX);
        code.extend_from_slice(self.implementation.as_slice());
        code.extend_from_slice(&MINIMAL_PROXY_SUFFIX);
        code
    }

    pub fn init_code_hash(&self) -> B256 {
        keccak256(self.init_code())
    }

    pub fn predict(&self, deployer: Address, raw_salt: B256) -> Address {
        create2_address(
            self.factory,
            Self::salt(deployer, raw_salt),
            self.init_code_hash(),
        )
    }
}

/// Predicts a standard-factory account address from its owners and threshold.
pub fn predict_safe_address(
    deployment: &ProxyFactoryDeployment,
    setup: &SafeSetup,
    salt_nonce: U256,
) -> Address {
    deployment.predict(setup, salt_nonce)
}

/// Predicts a clone-factory account address.
pub fn predict_clone_address(
    deployment: &CloneFactoryDeployment,
    deployer: Address,
    raw_salt: B256,
) -> Address {
    deployment.predict(deployer, raw_salt)
}
