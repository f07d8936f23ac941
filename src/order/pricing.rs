//! Order synthesis from live balances and the price oracle

use super::policy::{BalanceSnapshot, OrderPolicy};
use super::types::{BalanceKind, Order, OrderKind};
use super::{
    MAX_ORDER_DURATION, ONE_UNIT, ORACLE_DECIMALS, PRICE_STALENESS, PROPOSAL_DISCOUNT_PERCENT,
    RETRY_DELAY,
};
use crate::chain::PriceReading;
use crate::error::{KeeperError, KeeperResult};

use ethers::types::{I256, U256};

/// Scale an oracle answer to 18 decimals. `None` for non-positive prices.
pub fn normalize_price(price: I256) -> Option<U256> {
    if price <= I256::zero() {
        return None;
    }
    price
        .into_raw()
        .checked_mul(U256::exp10(18 - ORACLE_DECIMALS))
}

/// Normalized price if the reading is usable at `now`
pub(crate) fn fresh_price(reading: &PriceReading, now: u64) -> Result<U256, &'static str> {
    let price = normalize_price(reading.price).ok_or("invalid oracle price")?;
    if now.saturating_sub(reading.updated_at) > PRICE_STALENESS {
        return Err("stale oracle price");
    }
    Ok(price)
}

/// Target amount `sell_amount` buys at `normalized_price` (18 decimals)
pub fn expected_buy_amount(sell_amount: U256, normalized_price: U256) -> KeeperResult<U256> {
    sell_amount
        .checked_mul(U256::exp10(18))
        .and_then(|scaled| scaled.checked_div(normalized_price))
        .ok_or_else(|| KeeperError::Internal("buy amount overflow".to_string()))
}

pub(crate) fn percent_of(amount: U256, percent: u64) -> U256 {
    amount.saturating_mul(U256::from(percent)) / U256::from(100u64)
}

/// Expiry of a proposal made at `now`, bucketed so that polls within one
/// bucket produce the same order
pub fn proposal_valid_to(now: u64) -> KeeperResult<u32> {
    let valid_to = (now / MAX_ORDER_DURATION) * MAX_ORDER_DURATION + MAX_ORDER_DURATION;
    u32::try_from(valid_to).map_err(|_| KeeperError::Internal("validTo overflow".to_string()))
}

/// Amount to sell, or a retry signal when balances are too low
pub fn proposal_sell_amount(balances: &BalanceSnapshot, now: u64) -> KeeperResult<U256> {
    let retry_at = now.saturating_add(RETRY_DELAY);

    let sell_amount = balances.native.saturating_add(balances.wrapped);
    if sell_amount < ONE_UNIT {
        return Err(KeeperError::try_at(retry_at, "insufficient sell balance"));
    }

    let buy_available = balances.claimable.saturating_add(balances.target);
    if buy_available < ONE_UNIT {
        return Err(KeeperError::try_at(retry_at, "insufficient buy balance"));
    }

    Ok(sell_amount)
}

/// Build the order for `sell_amount` from the oracle reading
pub fn build_proposal(
    policy: &OrderPolicy,
    sell_amount: U256,
    reading: &PriceReading,
    now: u64,
) -> KeeperResult<Order> {
    let price = fresh_price(reading, now)
        .map_err(|reason| KeeperError::try_at(now.saturating_add(RETRY_DELAY), reason))?;
    let expected = expected_buy_amount(sell_amount, price)?;

    Ok(Order {
        sell_token: policy.wrapped_token,
        buy_token: policy.target_token,
        receiver: policy.account,
        sell_amount,
        buy_amount: percent_of(expected, PROPOSAL_DISCOUNT_PERCENT),
        valid_to: proposal_valid_to(now)?,
        app_data: policy.app_data,
        fee_amount: U256::zero(),
        kind: OrderKind::Sell,
        partially_fillable: false,
        sell_token_balance: BalanceKind::Erc20,
        buy_token_balance: BalanceKind::Erc20,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::policy::{validate_order, validate_slippage};
    use ethers::types::{Address, H256};

    const NOW: u64 = 1_700_000_123;

    fn policy() -> OrderPolicy {
        OrderPolicy {
            account: Address::from_low_u64_be(0xc3),
            wrapped_token: Address::from_low_u64_be(0xa1),
            target_token: Address::from_low_u64_be(0xb2),
            app_data: H256::repeat_byte(0x11),
        }
    }

    fn reading(price: i64, age: u64) -> PriceReading {
        PriceReading {
            price: I256::from(price),
            updated_at: NOW - age,
        }
    }

    #[test]
    fn test_price_normalization() {
        assert_eq!(
            normalize_price(I256::from(2_000_00000000i64)),
            Some(U256::exp10(18) * U256::from(2_000u64))
        );
        assert_eq!(normalize_price(I256::zero()), None);
        assert_eq!(normalize_price(I256::from(-5i64)), None);
    }

    #[test]
    fn test_proposal_buy_amount_for_known_price() {
        let order = build_proposal(&policy(), U256::exp10(18), &reading(2_000_00000000, 0), NOW)
            .unwrap();
        // 1e18 * 1e18 / 2000e18 = 5e14, less 3%
        assert_eq!(order.buy_amount, U256::from(485_000_000_000_000u64));
        assert_eq!(order.sell_amount, U256::exp10(18));
    }

    #[test]
    fn test_proposal_fields_follow_policy() {
        let policy = policy();
        let order = build_proposal(&policy, U256::exp10(18), &reading(2_000_00000000, 0), NOW)
            .unwrap();
        assert_eq!(order.sell_token, policy.wrapped_token);
        assert_eq!(order.buy_token, policy.target_token);
        assert_eq!(order.receiver, policy.account);
        assert_eq!(order.app_data, policy.app_data);
        assert!(order.fee_amount.is_zero());
        assert_eq!(order.kind, OrderKind::Sell);
        assert!(!order.partially_fillable);
        assert_eq!(order.sell_token_balance, BalanceKind::Erc20);
        assert_eq!(order.buy_token_balance, BalanceKind::Erc20);
    }

    #[test]
    fn test_valid_to_is_bucketed() {
        let a = proposal_valid_to(1_700_000_000).unwrap();
        let b = proposal_valid_to(1_700_000_000 + 600).unwrap();
        assert_eq!(a, b);
        assert!(u64::from(a) > 1_700_000_000);
        assert!(u64::from(a) <= 1_700_000_000 + MAX_ORDER_DURATION);
        assert_eq!(u64::from(a) % MAX_ORDER_DURATION, 0);
    }

    #[test]
    fn test_insufficient_sell_balance_is_retry() {
        let balances = BalanceSnapshot {
            native: U256::zero(),
            wrapped: U256::exp10(17) * U256::from(5u64),
            claimable: U256::zero(),
            target: U256::zero(),
        };
        let err = proposal_sell_amount(&balances, NOW).unwrap_err();
        match err {
            KeeperError::PollTryAtEpoch { epoch, reason } => {
                assert_eq!(epoch, NOW + RETRY_DELAY);
                assert_eq!(reason, "insufficient sell balance");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_insufficient_buy_balance_is_retry() {
        let balances = BalanceSnapshot {
            native: U256::exp10(18),
            wrapped: U256::zero(),
            claimable: U256::exp10(17),
            target: U256::exp10(17),
        };
        let err = proposal_sell_amount(&balances, NOW).unwrap_err();
        assert!(
            matches!(err, KeeperError::PollTryAtEpoch { ref reason, .. } if reason == "insufficient buy balance")
        );
    }

    #[test]
    fn test_sell_amount_counts_native_and_wrapped() {
        let balances = BalanceSnapshot {
            native: U256::exp10(17) * U256::from(6u64),
            wrapped: U256::exp10(17) * U256::from(5u64),
            claimable: U256::exp10(18),
            target: U256::zero(),
        };
        assert_eq!(
            proposal_sell_amount(&balances, NOW).unwrap(),
            U256::exp10(17) * U256::from(11u64)
        );
    }

    #[test]
    fn test_stale_or_invalid_price_is_retry() {
        for reading in [
            reading(2_000_00000000, PRICE_STALENESS + 1),
            reading(0, 0),
            reading(-1, 0),
        ] {
            let err = build_proposal(&policy(), U256::exp10(18), &reading, NOW).unwrap_err();
            assert_eq!(err.retry_at(), Some(NOW + RETRY_DELAY));
        }
    }

    #[test]
    fn test_price_at_staleness_boundary_is_usable() {
        build_proposal(
            &policy(),
            U256::exp10(18),
            &reading(2_000_00000000, PRICE_STALENESS),
            NOW,
        )
        .unwrap();
    }

    #[test]
    fn test_proposal_passes_validation() {
        let policy = policy();
        let prices = [1_00000000i64, 2_000_00000000, 123_45678901, 99_999_99999999];
        let wrapped_amounts = [
            U256::exp10(18),
            U256::exp10(18) * U256::from(7u64) + U256::from(3u64),
            U256::exp10(24),
        ];

        for price in prices {
            for wrapped in wrapped_amounts {
                let balances = BalanceSnapshot {
                    native: U256::zero(),
                    wrapped,
                    claimable: U256::zero(),
                    target: U256::exp10(18),
                };
                let reading = reading(price, 60);
                let sell_amount = proposal_sell_amount(&balances, NOW).unwrap();
                let order = build_proposal(&policy, sell_amount, &reading, NOW).unwrap();

                validate_order(&order, &policy, &balances, NOW).unwrap();
                validate_slippage(&order, &reading, NOW).unwrap();
            }
        }
    }
}
