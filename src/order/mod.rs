//! Admission engine for automated conversion orders
//!
//! Two directions over one policy:
//! - `policy` checks an externally supplied order
//! - `pricing` synthesizes the order the account is willing to place
//! - `signature` authorizes a signed payload against the stored domain
//!
//! A proposal built by `pricing` must always pass `policy` for the same
//! balances, oracle reading and time.

pub mod policy;
pub mod pricing;
pub mod signature;
pub mod types;

pub use policy::{BalanceSnapshot, OrderPolicy};
pub use types::{BalanceKind, Order, OrderKind};

use ethers::types::U256;

/// One whole unit of an 18-decimal asset
pub const ONE_UNIT: U256 = U256([1_000_000_000_000_000_000, 0, 0, 0]);

/// Maximum order lifetime, also the bucket size for proposal expiry (seconds)
pub const MAX_ORDER_DURATION: u64 = 30 * 60;

/// Delay suggested by retry signals (seconds)
pub const RETRY_DELAY: u64 = 60 * 60;

/// Maximum tolerated oracle age (seconds)
pub const PRICE_STALENESS: u64 = 3 * 60 * 60;

/// Decimals of the oracle answer
pub const ORACLE_DECIMALS: usize = 8;

/// Proposed buy amount as a percentage of the oracle expectation
pub const PROPOSAL_DISCOUNT_PERCENT: u64 = 97;

/// Lowest acceptable buy amount as a percentage of the oracle expectation
pub const SLIPPAGE_FLOOR_PERCENT: u64 = 95;
