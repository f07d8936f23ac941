//! Validator account
//!
//! The account owns the validator registry and its one-time configuration.
//! Every operation runs under a single async lock held across its external
//! calls, so each call sees and commits one consistent state:
//! - Registry mutations are staged on a copy and swapped in after the
//!   store accepted them
//! - Deposits take the oldest validator off a staged copy, so a failed
//!   transfer leaves the queue untouched
//! - Order validation and proposal read live balances and the oracle

mod deposit;

pub use deposit::{deposit_payload, withdrawal_credentials};

use crate::chain::{Collaborators, Settlement};
use crate::error::{KeeperError, KeeperResult};
use crate::events::AccountEvent;
use crate::metrics;
use crate::order::policy::{validate_order, validate_slippage};
use crate::order::pricing::{build_proposal, proposal_sell_amount};
use crate::order::signature::{decode_signed_order, EIP1271_MAGIC_VALUE};
use crate::order::{BalanceSnapshot, Order, OrderPolicy, ONE_UNIT};
use crate::registry::{
    registry_namespace, DepositId, RegistryEntry, ValidatorRecord, ValidatorRegistry,
};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Configuration written once by `initialize`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub owner: Address,
    pub app_data: H256,
    pub domain_separator: H256,
    pub settlement: Address,
}

/// Fixed addresses the account operates with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountAddresses {
    pub account: Address,
    pub wrapped_token: Address,
    pub target_token: Address,
    pub deposit_contract: Address,
}

/// Durable storage for account state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn save_account(&self, config: &AccountConfig) -> KeeperResult<()>;

    /// Replace the registry region `namespace` with `entries`
    async fn save_registry(&self, namespace: H256, entries: &[RegistryEntry])
        -> KeeperResult<()>;

    async fn record_event(&self, event: &AccountEvent) -> KeeperResult<()>;
}

#[derive(Default)]
struct AccountState {
    config: Option<AccountConfig>,
    registry: ValidatorRegistry,
    /// The in-memory registry is ahead of the store
    unsaved: bool,
}

impl AccountState {
    fn config(&self) -> KeeperResult<&AccountConfig> {
        self.config.as_ref().ok_or(KeeperError::NotInitialized)
    }

    fn ensure_owner(&self, caller: Address) -> KeeperResult<()> {
        match &self.config {
            Some(config) if config.owner == caller => Ok(()),
            _ => Err(KeeperError::Unauthorized),
        }
    }
}

/// The validator account state machine
pub struct ValidatorAccount {
    addresses: AccountAddresses,
    chain: Collaborators,
    store: Arc<dyn AccountStore>,
    state: Mutex<AccountState>,
}

impl ValidatorAccount {
    /// Fresh, uninitialized account
    pub fn new(
        addresses: AccountAddresses,
        chain: Collaborators,
        store: Arc<dyn AccountStore>,
    ) -> Self {
        Self::with_state(addresses, chain, store, None, ValidatorRegistry::new())
    }

    /// Account resumed from persisted state
    pub fn with_state(
        addresses: AccountAddresses,
        chain: Collaborators,
        store: Arc<dyn AccountStore>,
        config: Option<AccountConfig>,
        registry: ValidatorRegistry,
    ) -> Self {
        metrics::set_pending_validators(registry.len());
        Self {
            addresses,
            chain,
            store,
            state: Mutex::new(AccountState {
                config,
                registry,
                unsaved: false,
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.addresses.account
    }

    /// Current time as seen by the account's clock
    pub fn now(&self) -> u64 {
        self.chain.clock.now()
    }

    /// Bind the account to its owner and order template. Only succeeds once.
    pub async fn initialize(
        &self,
        owner: Address,
        app_data: H256,
        settlement: &dyn Settlement,
    ) -> KeeperResult<AccountConfig> {
        let mut state = self.state.lock().await;
        if state.config.is_some() {
            return Err(KeeperError::AlreadyInitialized);
        }

        let domain_separator = settlement.domain_separator().await?;
        let config = AccountConfig {
            owner,
            app_data,
            domain_separator,
            settlement: settlement.address(),
        };
        self.store.save_account(&config).await?;
        state.config = Some(config.clone());

        info!(
            "Account {:?} initialized for owner {:?}",
            self.addresses.account, owner
        );
        self.emit(AccountEvent::Initialized {
            owner,
            app_data,
            domain_separator,
        })
        .await;
        Ok(config)
    }

    pub async fn config(&self) -> Option<AccountConfig> {
        self.state.lock().await.config.clone()
    }

    // Registry

    pub async fn add_validator(
        &self,
        caller: Address,
        id: DepositId,
        pubkey: Bytes,
        signature: Bytes,
    ) -> KeeperResult<()> {
        self.mutate_registry(caller, |registry| {
            registry.add_validator(id, pubkey, signature)?;
            Ok(((), vec![AccountEvent::ValidatorAdded { deposit_id: id }]))
        })
        .await?;
        info!("Validator {:?} added", id);
        Ok(())
    }

    pub async fn add_validators(
        &self,
        caller: Address,
        ids: Vec<DepositId>,
        pubkeys: Vec<Bytes>,
        signatures: Vec<Bytes>,
    ) -> KeeperResult<()> {
        let count = ids.len();
        self.mutate_registry(caller, |registry| {
            let events = ids
                .iter()
                .map(|id| AccountEvent::ValidatorAdded { deposit_id: *id })
                .collect();
            registry.add_validators(ids, pubkeys, signatures)?;
            Ok(((), events))
        })
        .await?;
        info!("{} validators added", count);
        Ok(())
    }

    pub async fn remove_validator(
        &self,
        caller: Address,
        id: DepositId,
    ) -> KeeperResult<ValidatorRecord> {
        let record = self
            .mutate_registry(caller, |registry| {
                let record = registry.remove_validator(&id)?;
                Ok((record, vec![AccountEvent::ValidatorRemoved { deposit_id: id }]))
            })
            .await?;
        info!("Validator {:?} removed", id);
        Ok(record)
    }

    pub async fn remove_validators(&self, caller: Address, ids: Vec<DepositId>) -> KeeperResult<()> {
        self.mutate_registry(caller, |registry| {
            registry.remove_validators(&ids)?;
            let events = ids
                .iter()
                .map(|id| AccountEvent::ValidatorRemoved { deposit_id: *id })
                .collect();
            Ok(((), events))
        })
        .await?;
        Ok(())
    }

    pub async fn get_validator(&self, id: &DepositId) -> ValidatorRecord {
        self.state.lock().await.registry.get_validator(id)
    }

    pub async fn get_validators(&self) -> (Vec<DepositId>, Vec<ValidatorRecord>) {
        self.state.lock().await.registry.get_validators()
    }

    pub async fn pending_validators(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    // Deposit coordination

    /// Wrap the whole native balance. Returns the wrapped amount.
    pub async fn wrap_all(&self) -> KeeperResult<U256> {
        let _state = self.state.lock().await;
        let amount = self
            .chain
            .wrapped
            .native_balance(self.addresses.account)
            .await?;
        if amount.is_zero() {
            return Ok(amount);
        }

        self.chain.wrapped.deposit(amount).await?;
        info!("Wrapped {} native", amount);
        self.emit(AccountEvent::NativeWrapped { amount }).await;
        Ok(amount)
    }

    /// Claim all withdrawable staking rewards. Returns the claimed amount.
    pub async fn claim_all(&self) -> KeeperResult<U256> {
        let _state = self.state.lock().await;
        let amount = self
            .chain
            .rewards
            .withdrawable_amount(self.addresses.account)
            .await?;
        if amount.is_zero() {
            return Ok(amount);
        }

        self.chain
            .rewards
            .claim_withdrawal(self.addresses.account)
            .await?;
        info!("Claimed {} in staking rewards", amount);
        self.emit(AccountEvent::RewardsClaimed { amount }).await;
        Ok(amount)
    }

    /// Fund the oldest registered validator with one unit of the target asset
    pub async fn deposit_validator(&self) -> KeeperResult<DepositId> {
        let mut state = self.state.lock().await;
        let mut staged = state.registry.clone();
        let entry = staged.next()?;

        let payload = deposit_payload(self.addresses.account, &entry);
        let outcome = self
            .chain
            .target
            .transfer_and_call(self.addresses.deposit_contract, ONE_UNIT, payload)
            .await;

        match outcome {
            Ok(true) => {}
            Ok(false) => {
                warn!("Deposit for validator {:?} was rejected", entry.id);
                metrics::record_deposit("rejected");
                return Err(KeeperError::FailedToDeposit(entry.id));
            }
            Err(e) => {
                warn!("Deposit for validator {:?} failed: {}", entry.id, e);
                metrics::record_deposit("failed");
                return Err(KeeperError::FailedToDeposit(entry.id));
            }
        }

        // The transfer is final, so the dequeue is applied even if persisting it fails
        state.registry = staged;
        metrics::record_deposit("deposited");
        metrics::set_pending_validators(state.registry.len());

        let entries = state.registry.entries();
        let saved = match self.store.save_registry(registry_namespace(), &entries).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Saving registry after deposit failed, retrying: {}", e);
                self.store.save_registry(registry_namespace(), &entries).await
            }
        };
        if let Err(e) = saved {
            error!(
                "Validator {:?} deposited but registry was not persisted: {}",
                entry.id, e
            );
            state.unsaved = true;
            return Err(e);
        }
        state.unsaved = false;

        info!("Validator {:?} deposited", entry.id);
        self.emit(AccountEvent::ValidatorDeposited {
            deposit_id: entry.id,
            pubkey: entry.record.pubkey,
        })
        .await;
        Ok(entry.id)
    }

    /// Persist a registry left unsaved by a deposit. Returns whether a save ran.
    pub async fn flush_registry(&self) -> KeeperResult<bool> {
        let mut state = self.state.lock().await;
        if !state.unsaved {
            return Ok(false);
        }

        self.store
            .save_registry(registry_namespace(), &state.registry.entries())
            .await?;
        state.unsaved = false;
        info!("Persisted registry left over from an earlier deposit");
        Ok(true)
    }

    // Order admission

    pub async fn balances(&self) -> KeeperResult<BalanceSnapshot> {
        let _state = self.state.lock().await;
        self.read_balances().await
    }

    /// Check that `order` is one this account is willing to settle
    pub async fn validate(&self, order: &Order) -> KeeperResult<()> {
        let state = self.state.lock().await;
        let config = state.config()?;
        self.validate_with(config, order).await
    }

    /// Synthesize the conversion order for the current balances and price
    pub async fn propose_order(&self) -> KeeperResult<Order> {
        let state = self.state.lock().await;
        let config = state.config()?;
        let now = self.chain.clock.now();

        let result = self.build_order(config, now).await;
        match &result {
            Ok(order) => {
                metrics::record_proposal();
                debug!(
                    "Proposed sell {} for {} valid to {}",
                    order.sell_amount, order.buy_amount, order.valid_to
                );
            }
            Err(KeeperError::PollTryAtEpoch { reason, epoch }) => {
                metrics::record_retry(reason);
                debug!("No proposal before {}: {}", epoch, reason);
            }
            Err(_) => {}
        }
        result
    }

    /// Authorize a settlement of `hash` whose signature is the encoded order.
    /// Returns the contract-signature magic value.
    pub async fn check_signature(&self, hash: H256, payload: &[u8]) -> KeeperResult<[u8; 4]> {
        let state = self.state.lock().await;
        let config = state.config()?;

        let order = decode_signed_order(hash, payload, config.domain_separator)?;
        self.validate_with(config, &order).await?;
        Ok(EIP1271_MAGIC_VALUE)
    }

    /// Settlement UID of an order placed by this account
    pub async fn order_uid(&self, order: &Order) -> KeeperResult<Bytes> {
        let state = self.state.lock().await;
        let config = state.config()?;
        Ok(order.uid(config.domain_separator, self.addresses.account))
    }

    async fn validate_with(&self, config: &AccountConfig, order: &Order) -> KeeperResult<()> {
        let now = self.chain.clock.now();
        let result = self.check_order(config, order, now).await;
        metrics::record_validation(result.is_ok());
        if let Err(e) = &result {
            debug!("Order rejected: {}", e);
        }
        result
    }

    async fn check_order(&self, config: &AccountConfig, order: &Order, now: u64) -> KeeperResult<()> {
        let balances = self.read_balances().await?;
        validate_order(order, &self.policy(config), &balances, now)?;

        let reading = self.chain.oracle.latest_price().await?;
        validate_slippage(order, &reading, now)
    }

    async fn build_order(&self, config: &AccountConfig, now: u64) -> KeeperResult<Order> {
        let balances = self.read_balances().await?;
        let sell_amount = proposal_sell_amount(&balances, now)?;

        let reading = self.chain.oracle.latest_price().await?;
        build_proposal(&self.policy(config), sell_amount, &reading, now)
    }

    async fn read_balances(&self) -> KeeperResult<BalanceSnapshot> {
        let account = self.addresses.account;
        let (native, wrapped, claimable, target) = tokio::try_join!(
            self.chain.wrapped.native_balance(account),
            self.chain.wrapped.balance_of(account),
            self.chain.rewards.withdrawable_amount(account),
            self.chain.target.balance_of(account),
        )?;
        Ok(BalanceSnapshot {
            native,
            wrapped,
            claimable,
            target,
        })
    }

    fn policy(&self, config: &AccountConfig) -> OrderPolicy {
        OrderPolicy {
            account: self.addresses.account,
            wrapped_token: self.addresses.wrapped_token,
            target_token: self.addresses.target_token,
            app_data: config.app_data,
        }
    }

    /// Apply an owner-only registry change. The change becomes visible only
    /// after the store has accepted the new registry.
    async fn mutate_registry<T>(
        &self,
        caller: Address,
        mutation: impl FnOnce(&mut ValidatorRegistry) -> KeeperResult<(T, Vec<AccountEvent>)>,
    ) -> KeeperResult<T> {
        let mut state = self.state.lock().await;
        state.ensure_owner(caller)?;

        let mut staged = state.registry.clone();
        let (value, events) = mutation(&mut staged)?;

        self.store
            .save_registry(registry_namespace(), &staged.entries())
            .await?;
        state.registry = staged;
        state.unsaved = false;
        metrics::set_pending_validators(state.registry.len());

        for event in events {
            self.emit(event).await;
        }
        Ok(value)
    }

    async fn emit(&self, event: AccountEvent) {
        debug!(event = event.name(), "account event");
        if let Err(e) = self.store.record_event(&event).await {
            warn!("Failed to record {} event: {}", event.name(), e);
        }
    }
}
