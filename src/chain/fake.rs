//! In-memory chain used by unit tests

use super::{
    Clock, Collaborators, PriceOracle, PriceReading, RewardClaim, Settlement, TargetToken,
    WrappedToken,
};
use crate::error::{KeeperError, KeeperResult};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, I256, U256};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct FakeState {
    pub native: U256,
    pub wrapped: U256,
    pub claimable: U256,
    pub target: U256,
    pub price: I256,
    pub updated_at: u64,
    pub now: u64,
    pub domain_separator: H256,
    /// Make `transfer_and_call` report failure
    pub reject_transfers: bool,
    /// Successful transfers: recipient, amount, payload
    pub transfers: Vec<(Address, U256, Bytes)>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            native: U256::zero(),
            wrapped: U256::zero(),
            claimable: U256::zero(),
            target: U256::zero(),
            price: I256::from(2_000_00000000i64),
            updated_at: 1_700_000_000,
            now: 1_700_000_000,
            domain_separator: H256::repeat_byte(0xd0),
            reject_transfers: false,
            transfers: Vec::new(),
        }
    }
}

/// Single account ledger shared by all fake collaborators
#[derive(Default)]
pub struct FakeChain {
    state: Mutex<FakeState>,
}

impl FakeChain {
    pub fn new(state: FakeState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    pub fn update(&self, f: impl FnOnce(&mut FakeState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn snapshot(&self) -> FakeState {
        self.state.lock().unwrap().clone()
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            oracle: self.clone(),
            wrapped: self.clone(),
            rewards: self.clone(),
            target: self.clone(),
            clock: self.clone(),
        }
    }
}

#[async_trait]
impl PriceOracle for FakeChain {
    async fn latest_price(&self) -> KeeperResult<PriceReading> {
        let state = self.state.lock().unwrap();
        Ok(PriceReading {
            price: state.price,
            updated_at: state.updated_at,
        })
    }
}

#[async_trait]
impl WrappedToken for FakeChain {
    async fn native_balance(&self, _account: Address) -> KeeperResult<U256> {
        Ok(self.state.lock().unwrap().native)
    }

    async fn balance_of(&self, _account: Address) -> KeeperResult<U256> {
        Ok(self.state.lock().unwrap().wrapped)
    }

    async fn deposit(&self, amount: U256) -> KeeperResult<()> {
        let mut state = self.state.lock().unwrap();
        if amount > state.native {
            return Err(KeeperError::Chain("insufficient native balance".to_string()));
        }
        state.native -= amount;
        state.wrapped += amount;
        Ok(())
    }
}

#[async_trait]
impl RewardClaim for FakeChain {
    async fn withdrawable_amount(&self, _account: Address) -> KeeperResult<U256> {
        Ok(self.state.lock().unwrap().claimable)
    }

    async fn claim_withdrawal(&self, _account: Address) -> KeeperResult<()> {
        let mut state = self.state.lock().unwrap();
        let claimed = std::mem::take(&mut state.claimable);
        state.target += claimed;
        Ok(())
    }
}

#[async_trait]
impl TargetToken for FakeChain {
    async fn balance_of(&self, _account: Address) -> KeeperResult<U256> {
        Ok(self.state.lock().unwrap().target)
    }

    async fn transfer_and_call(
        &self,
        to: Address,
        amount: U256,
        payload: Bytes,
    ) -> KeeperResult<bool> {
        let mut state = self.state.lock().unwrap();
        if state.reject_transfers || amount > state.target {
            return Ok(false);
        }
        state.target -= amount;
        state.transfers.push((to, amount, payload));
        Ok(true)
    }
}

#[async_trait]
impl Settlement for FakeChain {
    fn address(&self) -> Address {
        Address::from_low_u64_be(0x9008)
    }

    async fn domain_separator(&self) -> KeeperResult<H256> {
        Ok(self.state.lock().unwrap().domain_separator)
    }
}

impl Clock for FakeChain {
    fn now(&self) -> u64 {
        self.state.lock().unwrap().now
    }
}
