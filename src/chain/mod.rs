//! Chain module - external collaborators of the account
//!
//! This module provides:
//! - Capability traits for the price oracle, wrapped native token, reward
//!   claim, target token and settlement contract
//! - Multi-RPC provider with automatic failover
//! - ethers-backed implementations of every capability

pub mod contracts;
pub mod provider;

#[cfg(test)]
pub mod fake;

pub use contracts::{
    OracleContract, RewardClaimContract, SettlementContract, TargetTokenContract,
    WrappedTokenContract,
};
pub use provider::ChainProvider;

use crate::error::KeeperResult;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, I256, U256};
use std::sync::Arc;

/// Latest oracle answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceReading {
    /// Answer with the oracle's native precision
    pub price: I256,
    /// Unix timestamp of the last update
    pub updated_at: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn latest_price(&self) -> KeeperResult<PriceReading>;
}

/// Wrapped native asset, plus the account's unwrapped native balance
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WrappedToken: Send + Sync {
    async fn native_balance(&self, account: Address) -> KeeperResult<U256>;

    async fn balance_of(&self, account: Address) -> KeeperResult<U256>;

    /// Wrap `amount` of the native asset
    async fn deposit(&self, amount: U256) -> KeeperResult<()>;
}

/// Staking reward withdrawals, paid out in the target asset
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RewardClaim: Send + Sync {
    async fn withdrawable_amount(&self, account: Address) -> KeeperResult<U256>;

    async fn claim_withdrawal(&self, account: Address) -> KeeperResult<()>;
}

/// Target asset with transfer-and-call support
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TargetToken: Send + Sync {
    async fn balance_of(&self, account: Address) -> KeeperResult<U256>;

    /// Transfer `amount` to `to` and invoke its token callback with `payload`
    async fn transfer_and_call(&self, to: Address, amount: U256, payload: Bytes)
        -> KeeperResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Settlement: Send + Sync {
    fn address(&self) -> Address;

    async fn domain_separator(&self) -> KeeperResult<H256>;
}

#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current unix time in seconds
    fn now(&self) -> u64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp().max(0) as u64
    }
}

/// Every collaborator the account talks to during normal operation
#[derive(Clone)]
pub struct Collaborators {
    pub oracle: Arc<dyn PriceOracle>,
    pub wrapped: Arc<dyn WrappedToken>,
    pub rewards: Arc<dyn RewardClaim>,
    pub target: Arc<dyn TargetToken>,
    pub clock: Arc<dyn Clock>,
}
