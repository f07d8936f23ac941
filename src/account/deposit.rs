//! Deposit contract payload encoding

use crate::registry::RegistryEntry;

use ethers::types::{Address, Bytes, H256};

/// Execution-layer withdrawal credentials pointing at `account`
pub fn withdrawal_credentials(account: Address) -> H256 {
    let mut credentials = [0u8; 32];
    credentials[0] = 0x01;
    credentials[12..].copy_from_slice(account.as_bytes());
    H256(credentials)
}

/// `transferAndCall` data for the deposit contract:
/// credentials, pubkey, signature and deposit data root, packed
pub fn deposit_payload(account: Address, entry: &RegistryEntry) -> Bytes {
    let record = &entry.record;
    let mut payload =
        Vec::with_capacity(32 + record.pubkey.len() + record.signature.len() + 32);
    payload.extend_from_slice(withdrawal_credentials(account).as_bytes());
    payload.extend_from_slice(&record.pubkey);
    payload.extend_from_slice(&record.signature);
    payload.extend_from_slice(entry.id.as_bytes());
    Bytes::from(payload)
}
