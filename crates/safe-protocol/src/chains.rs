use alloy_primitives::{address, hex, Address, Bytes};
use serde::Serialize;

use crate::error::SafeError;
use crate::predict::ProxyFactoryDeployment;

/// `proxyCreationCode()` of the 1.3.0 proxy factory: the proxy constructor,
/// its 171-byte runtime and the revert string for a zero singleton.
pub const PROXY_CREATION_CODE_V1_3_0: &[u8] = &hex!(
    "608060405234801561001057600080fd5b506040516101e63803806101e6833981810160405260208110156100335760"
    "0080fd5b8101908080519060200190929190505050600073ffffffffffffffffffffffffffffffffffffffff168173ff"
    "ffffffffffffffffffffffffffffffffffffff1614156100ca576040517f08c379a00000000000000000000000000000"
    "000000000000000000000000000081526004018080602001828103825260228152602001806101c46022913960400191"
    "505060405180910390fd5b806000806101000a81548173ffffffffffffffffffffffffffffffffffffffff0219169083"
    "73ffffffffffffffffffffffffffffffffffffffff1602179055505060ab806101196000396000f3fe608060405273ff"
    "ffffffffffffffffffffffffffffffffffffff600054167fa619486e0000000000000000000000000000000000000000"
    "000000000000000060003514156050578060005260206000f35b3660008037600080366000845af43d6000803e600081"
    "14156070573d6000fd5b3d6000f3fea2646970667358221220d1429297349653a4918076d650332de1a1068c5f3e07c5"
    "c82360c277770b955264736f6c63430007060033496e76616c69642073696e676c65746f6e2061646472657373207072"
    "6f7669646564"
);

/// Definition of an EVM-compatible network the account can live on.
#[derive(Debug, Clone, Serialize)]
pub struct EvmChain {
    pub chain_id: u64,
    pub name: &'static str,
    pub is_testnet: bool,
    /// L2 networks use the event-emitting singleton so indexers can follow
    /// executions without tracing.
    pub prefers_l2_singleton: bool,
}

/// Canonical contract addresses of one account release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafeDeployment {
    pub version: &'static str,
    pub proxy_factory: Address,
    pub singleton: Address,
    pub singleton_l2: Address,
    pub fallback_handler: Address,
    /// What the factory's `proxyCreationCode()` returns, when known.
    #[serde(skip)]
    pub proxy_creation_code: Option<&'static [u8]>,
}

impl SafeDeployment {
    /// Singleton to clone on `chain`.
    pub fn singleton_for(&self, chain: &EvmChain) -> Address {
        if chain.prefers_l2_singleton {
            self.singleton_l2
        } else {
            self.singleton
        }
    }

    /// The release's proxy factory with its canonical creation code.
    pub fn proxy_factory(&self, chain: &EvmChain) -> Result<ProxyFactoryDeployment, SafeError> {
        let code = self.proxy_creation_code.ok_or_else(|| {
            SafeError::Validation(format!(
                "no proxy creation code known for release {}; read it from the factory",
                self.version
            ))
        })?;
        Ok(self.proxy_factory_with_code(chain, Bytes::from_static(code)))
    }

    /// Combines the canonical addresses with proxy creation code read from
    /// the factory.
    pub fn proxy_factory_with_code(
        &self,
        chain: &EvmChain,
        proxy_creation_code: impl Into<Bytes>,
    ) -> ProxyFactoryDeployment {
        ProxyFactoryDeployment {
            factory: self.proxy_factory,
            singleton: self.singleton_for(chain),
            proxy_creation_code: proxy_creation_code.into(),
        }
    }
}

/// Release 1.3.0.
pub const SAFE_V1_3_0: SafeDeployment = SafeDeployment {
    version: "1.3.0",
    proxy_factory: address!("a6B71E26C5e0845f74c812102Ca7114b6a896AB2"),
    singleton: address!("d9Db270c1B5E3Bd161E8c8503c55cEABeE709552"),
    singleton_l2: address!("3E5c63644E683549055b9Be8653de26E0B4CD36E"),
    fallback_handler: address!("f48f2B2d2a534e402487b3ee7C18c33Aec0Fe5e4"),
    proxy_creation_code: Some(PROXY_CREATION_CODE_V1_3_0),
};

/// Release 1.4.1.
pub const SAFE_V1_4_1: SafeDeployment = SafeDeployment {
    version: "1.4.1",
    proxy_factory: address!("4e1DCf7AD4e460CfD30791CCC4F9c8a4f820ec67"),
    singleton: address!("41675C099F32341bf84BFc5382aF534df5C7461a"),
    singleton_l2: address!("29fcB43b46531BcA003ddC8FCB67FFE91900C762"),
    fallback_handler: address!("fd0732Dc9E303f09fCEf3a7388Ad10A83459Ec99"),
    proxy_creation_code: None,
};

const ALL_DEPLOYMENTS: &[&SafeDeployment] = &[&SAFE_V1_3_0, &SAFE_V1_4_1];

/// Ethereum Mainnet (chain ID 1).
pub const ETHEREUM: EvmChain = EvmChain {
    chain_id: 1,
    name: "Ethereum",
    is_testnet: false,
    prefers_l2_singleton: false,
};

/// Polygon PoS (chain ID 137).
pub const POLYGON: EvmChain = EvmChain {
    chain_id: 137,
    name: "Polygon",
    is_testnet: false,
    prefers_l2_singleton: true,
};

/// Arbitrum One (chain ID 42161).
pub const ARBITRUM: EvmChain = EvmChain {
    chain_id: 42161,
    name: "Arbitrum One",
    is_testnet: false,
    prefers_l2_singleton: true,
};

/// Base (chain ID 8453).
pub const BASE: EvmChain = EvmChain {
    chain_id: 8453,
    name: "Base",
    is_testnet: false,
    prefers_l2_singleton: true,
};

/// Optimism (chain ID 10).
pub const OPTIMISM: EvmChain = EvmChain {
    chain_id: 10,
    name: "Optimism",
    is_testnet: false,
    prefers_l2_singleton: true,
};

/// Gnosis Chain (chain ID 100).
pub const GNOSIS: EvmChain = EvmChain {
    chain_id: 100,
    name: "Gnosis",
    is_testnet: false,
    prefers_l2_singleton: true,
};

/// Sepolia Testnet (chain ID 11155111).
pub const SEPOLIA: EvmChain = EvmChain {
    chain_id: 11155111,
    name: "Sepolia",
    is_testnet: true,
    prefers_l2_singleton: true,
};

const ALL_CHAINS: &[&EvmChain] = &[
    &ETHEREUM, &POLYGON, &ARBITRUM, &BASE, &OPTIMISM, &GNOSIS, &SEPOLIA,
];

/// Returns the chain definition for a given chain ID, or `None` if unsupported.
pub fn get_chain(chain_id: u64) -> Option<&'static EvmChain> {
    ALL_CHAINS
        .iter()
        .find(|c| c.chain_id == chain_id)
        .copied()
}

/// Returns all supported chain definitions.
pub fn supported_chains() -> Vec<&'static EvmChain> {
    ALL_CHAINS.to_vec()
}

/// Returns the canonical deployment of a release such as `"1.4.1"`.
pub fn deployment_for_version(version: &str) -> Option<&'static SafeDeployment> {
    ALL_DEPLOYMENTS
        .iter()
        .find(|d| d.version == version)
        .copied()
}
