//! Validator registry
//!
//! Holds the validator activation records waiting for a funded deposit:
//! - Unique deposit identifiers (the deposit data root)
//! - Strict FIFO consumption for deposits
//! - All-or-nothing bulk add/remove
//!
//! The registry is persisted under its own namespace so that it never
//! collides with other account state.

mod validators;

pub use validators::{DepositId, RegistryEntry, ValidatorRecord, ValidatorRegistry};

use ethers::abi::Token;
use ethers::types::{H256, U256};
use ethers::utils::keccak256;

/// Identifier the registry namespace is derived from
pub const REGISTRY_STORAGE_ID: &str = "validator-keeper.storage.registry";

/// Namespace tag for persisted registry state.
///
/// `keccak256(abi.encode(uint256(keccak256(id)) - 1)) & ~0xff`
pub fn registry_namespace() -> H256 {
    let id = U256::from_big_endian(&keccak256(REGISTRY_STORAGE_ID.as_bytes()));
    let encoded = ethers::abi::encode(&[Token::Uint(id - U256::one())]);
    let mut slot = keccak256(encoded);
    slot[31] = 0;
    H256(slot)
}
