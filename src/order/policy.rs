//! Admissibility checks for conversion orders

use super::pricing::{expected_buy_amount, fresh_price, percent_of};
use super::types::{BalanceKind, Order, OrderKind};
use super::{MAX_ORDER_DURATION, ONE_UNIT, SLIPPAGE_FLOOR_PERCENT};
use crate::chain::PriceReading;
use crate::error::{KeeperError, KeeperResult};

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Fixed parameters every order of this account must match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPolicy {
    /// The account selling and receiving
    pub account: Address,
    /// Asset being sold
    pub wrapped_token: Address,
    /// Asset being bought
    pub target_token: Address,
    /// Order template tag
    pub app_data: H256,
}

/// Account balances relevant to order admission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Unwrapped native balance
    pub native: U256,
    /// Wrapped native balance
    pub wrapped: U256,
    /// Staking rewards claimable into the target asset
    pub claimable: U256,
    /// Target asset balance
    pub target: U256,
}

/// Check preconditions, balance floors and order shape.
///
/// Fails with the first violated rule.
pub fn validate_order(
    order: &Order,
    policy: &OrderPolicy,
    balances: &BalanceSnapshot,
    now: u64,
) -> KeeperResult<()> {
    if !balances.native.is_zero() {
        return Err(KeeperError::order_not_valid("native balance must be wrapped first"));
    }
    if !balances.claimable.is_zero() {
        return Err(KeeperError::order_not_valid("staking rewards must be claimed first"));
    }

    if balances.wrapped < ONE_UNIT {
        return Err(KeeperError::order_not_valid("insufficient wrapped balance"));
    }
    if balances.target < ONE_UNIT {
        return Err(KeeperError::order_not_valid("insufficient target balance"));
    }

    if order.sell_token != policy.wrapped_token {
        return Err(KeeperError::order_not_valid("sell token must be the wrapped asset"));
    }
    if order.buy_token != policy.target_token {
        return Err(KeeperError::order_not_valid("buy token must be the target asset"));
    }
    if order.sell_amount < ONE_UNIT || order.sell_amount > balances.wrapped {
        return Err(KeeperError::order_not_valid("sell amount out of range"));
    }
    if order.receiver != policy.account {
        return Err(KeeperError::order_not_valid("receiver must be the account"));
    }
    if u64::from(order.valid_to) > now.saturating_add(MAX_ORDER_DURATION) {
        return Err(KeeperError::order_not_valid("validity window too long"));
    }
    if order.app_data != policy.app_data {
        return Err(KeeperError::order_not_valid("app data mismatch"));
    }
    if !order.fee_amount.is_zero() {
        return Err(KeeperError::order_not_valid("fee must be zero"));
    }
    if order.kind != OrderKind::Sell {
        return Err(KeeperError::order_not_valid("order kind must be sell"));
    }
    if order.partially_fillable {
        return Err(KeeperError::order_not_valid("order must be fill-or-kill"));
    }
    if order.sell_token_balance != BalanceKind::Erc20 {
        return Err(KeeperError::order_not_valid("sell balance must be erc20"));
    }
    if order.buy_token_balance != BalanceKind::Erc20 {
        return Err(KeeperError::order_not_valid("buy balance must be erc20"));
    }

    Ok(())
}

/// Check the order's buy amount against the oracle-implied amount
pub fn validate_slippage(order: &Order, reading: &PriceReading, now: u64) -> KeeperResult<()> {
    let price = fresh_price(reading, now).map_err(KeeperError::order_not_valid)?;
    let expected = expected_buy_amount(order.sell_amount, price)?;
    let floor = percent_of(expected, SLIPPAGE_FLOOR_PERCENT);

    if order.buy_amount < floor {
        return Err(KeeperError::order_not_valid("buy amount below slippage floor"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::types::tests::sample_order;
    use ethers::types::I256;

    const NOW: u64 = 1_700_000_000;

    fn policy() -> OrderPolicy {
        OrderPolicy {
            account: Address::from_low_u64_be(0xc3),
            wrapped_token: Address::from_low_u64_be(0xa1),
            target_token: Address::from_low_u64_be(0xb2),
            app_data: H256::repeat_byte(0x11),
        }
    }

    fn balances() -> BalanceSnapshot {
        BalanceSnapshot {
            native: U256::zero(),
            wrapped: U256::exp10(18) * U256::from(2u64),
            claimable: U256::zero(),
            target: U256::exp10(18),
        }
    }

    fn reason(result: KeeperResult<()>) -> String {
        match result {
            Err(KeeperError::OrderNotValid(reason)) => reason,
            other => panic!("expected policy violation, got {:?}", other),
        }
    }

    #[test]
    fn test_sample_order_is_admissible() {
        validate_order(&sample_order(), &policy(), &balances(), NOW).unwrap();
    }

    #[test]
    fn test_unwrapped_native_blocks_validation() {
        let mut balances = balances();
        balances.native = U256::one();
        assert_eq!(
            reason(validate_order(&sample_order(), &policy(), &balances, NOW)),
            "native balance must be wrapped first"
        );
    }

    #[test]
    fn test_unclaimed_rewards_block_validation() {
        let mut balances = balances();
        balances.claimable = U256::one();
        assert_eq!(
            reason(validate_order(&sample_order(), &policy(), &balances, NOW)),
            "staking rewards must be claimed first"
        );
    }

    #[test]
    fn test_balance_floors() {
        let mut low_wrapped = balances();
        low_wrapped.wrapped = ONE_UNIT - U256::one();
        assert_eq!(
            reason(validate_order(&sample_order(), &policy(), &low_wrapped, NOW)),
            "insufficient wrapped balance"
        );

        let mut low_target = balances();
        low_target.target = ONE_UNIT - U256::one();
        assert_eq!(
            reason(validate_order(&sample_order(), &policy(), &low_target, NOW)),
            "insufficient target balance"
        );
    }

    #[test]
    fn test_order_shape_rules() {
        let cases: Vec<(Box<dyn Fn(&mut Order)>, &str)> = vec![
            (
                Box::new(|o: &mut Order| o.sell_token = Address::from_low_u64_be(1)),
                "sell token must be the wrapped asset",
            ),
            (
                Box::new(|o: &mut Order| o.buy_token = Address::from_low_u64_be(1)),
                "buy token must be the target asset",
            ),
            (Box::new(|o: &mut Order| o.sell_amount = ONE_UNIT - U256::one()), "sell amount out of range"),
            (
                Box::new(|o: &mut Order| o.sell_amount = U256::exp10(18) * U256::from(3u64)),
                "sell amount out of range",
            ),
            (
                Box::new(|o: &mut Order| o.receiver = Address::from_low_u64_be(1)),
                "receiver must be the account",
            ),
            (
                Box::new(|o: &mut Order| o.valid_to = (NOW + MAX_ORDER_DURATION + 1) as u32),
                "validity window too long",
            ),
            (Box::new(|o: &mut Order| o.app_data = H256::zero()), "app data mismatch"),
            (Box::new(|o: &mut Order| o.fee_amount = U256::one()), "fee must be zero"),
            (Box::new(|o: &mut Order| o.kind = OrderKind::Buy), "order kind must be sell"),
            (Box::new(|o: &mut Order| o.partially_fillable = true), "order must be fill-or-kill"),
            (
                Box::new(|o: &mut Order| o.sell_token_balance = BalanceKind::External),
                "sell balance must be erc20",
            ),
            (
                Box::new(|o: &mut Order| o.buy_token_balance = BalanceKind::Internal),
                "buy balance must be erc20",
            ),
        ];

        for (mutate, expected) in cases {
            let mut order = sample_order();
            mutate(&mut order);
            assert_eq!(
                reason(validate_order(&order, &policy(), &balances(), NOW)),
                expected
            );
        }
    }

    #[test]
    fn test_validity_window_boundary_is_inclusive() {
        let mut order = sample_order();
        order.valid_to = (NOW + MAX_ORDER_DURATION) as u32;
        validate_order(&order, &policy(), &balances(), NOW).unwrap();
    }

    #[test]
    fn test_slippage_floor() {
        let reading = PriceReading {
            price: I256::from(2_000_00000000i64),
            updated_at: NOW - 60,
        };
        // 1e18 sell at 2000 expects 5e14; floor is 4.75e14
        let mut order = sample_order();
        order.buy_amount = U256::from(475_000_000_000_000u64);
        validate_slippage(&order, &reading, NOW).unwrap();

        order.buy_amount = U256::from(474_999_999_999_999u64);
        assert_eq!(
            reason(validate_slippage(&order, &reading, NOW)),
            "buy amount below slippage floor"
        );
    }

    #[test]
    fn test_slippage_rejects_unusable_oracle() {
        let stale = PriceReading {
            price: I256::from(2_000_00000000i64),
            updated_at: NOW - 3 * 60 * 60 - 1,
        };
        assert_eq!(
            reason(validate_slippage(&sample_order(), &stale, NOW)),
            "stale oracle price"
        );

        let negative = PriceReading {
            price: I256::from(-1i64),
            updated_at: NOW,
        };
        assert_eq!(
            reason(validate_slippage(&sample_order(), &negative, NOW)),
            "invalid oracle price"
        );
    }
}
