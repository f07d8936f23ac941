//! Contract-signature style authorization of order payloads

use super::types::Order;
use crate::error::{KeeperError, KeeperResult};

use ethers::types::H256;

/// Value returned when a signed payload is accepted (`isValidSignature` selector)
pub const EIP1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

/// Decode `payload` and make sure it is the order behind `hash`
pub fn decode_signed_order(
    hash: H256,
    payload: &[u8],
    domain_separator: H256,
) -> KeeperResult<Order> {
    let order = Order::abi_decode(payload)?;
    if order.digest(domain_separator) != hash {
        return Err(KeeperError::InvalidHash);
    }
    Ok(order)
}
