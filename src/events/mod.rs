//! Account event types
//!
//! Emitted for every committed state change of the account and persisted
//! alongside it.

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// Events emitted by the validator account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccountEvent {
    /// Account bound to its owner and order template
    Initialized {
        owner: Address,
        app_data: H256,
        domain_separator: H256,
    },

    /// Validator queued for activation
    ValidatorAdded { deposit_id: H256 },

    /// Validator removed by the owner
    ValidatorRemoved { deposit_id: H256 },

    /// Validator funded through the deposit contract
    ValidatorDeposited { deposit_id: H256, pubkey: Bytes },

    /// Native balance wrapped
    NativeWrapped { amount: U256 },

    /// Staking rewards claimed into the target asset
    RewardsClaimed { amount: U256 },

    /// Conversion order proposed for settlement
    OrderProposed { uid: Bytes, valid_to: u32 },
}

impl AccountEvent {
    /// Get event name for metrics and storage
    pub fn name(&self) -> &'static str {
        match self {
            AccountEvent::Initialized { .. } => "initialized",
            AccountEvent::ValidatorAdded { .. } => "validator_added",
            AccountEvent::ValidatorRemoved { .. } => "validator_removed",
            AccountEvent::ValidatorDeposited { .. } => "validator_deposited",
            AccountEvent::NativeWrapped { .. } => "native_wrapped",
            AccountEvent::RewardsClaimed { .. } => "rewards_claimed",
            AccountEvent::OrderProposed { .. } => "order_proposed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = AccountEvent::ValidatorAdded {
            deposit_id: H256::repeat_byte(1),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "validator_added");
        assert_eq!(event.name(), "validator_added");
    }
}
