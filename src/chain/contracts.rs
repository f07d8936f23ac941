//! ethers bindings for the account's external contracts

use super::provider::{ChainProvider, SignerClient};
use super::{PriceOracle, PriceReading, RewardClaim, Settlement, TargetToken, WrappedToken};
use crate::error::{KeeperError, KeeperResult};

use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::{abigen, ContractCall};
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info};

abigen!(
    IAggregator,
    r#"[
        function latestRoundData() external view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
    ]"#
);

abigen!(
    IWrappedNative,
    r#"[
        function deposit() external payable
        function balanceOf(address account) external view returns (uint256)
    ]"#
);

abigen!(
    IDepositContract,
    r#"[
        function claimWithdrawal(address _address) external
        function withdrawableAmount(address _address) external view returns (uint256)
    ]"#
);

abigen!(
    IErc677,
    r#"[
        function balanceOf(address account) external view returns (uint256)
        function transferAndCall(address to, uint256 value, bytes data) external returns (bool)
    ]"#
);

abigen!(
    ISettlement,
    r#"[
        function domainSeparator() external view returns (bytes32)
    ]"#
);

fn read_failed(provider: &ChainProvider, e: impl Display) -> KeeperError {
    provider.failover();
    KeeperError::Chain(e.to_string())
}

/// Send a state-changing call and wait for a successful receipt
async fn submit<D: Detokenize>(
    call: ContractCall<SignerClient, D>,
    operation: &str,
) -> KeeperResult<TransactionReceipt> {
    let pending = call
        .send()
        .await
        .map_err(|e| KeeperError::Chain(format!("{} failed to send: {}", operation, e)))?;
    let tx_hash = pending.tx_hash();
    debug!("{} sent: {:?}", operation, tx_hash);

    let receipt = pending
        .await
        .map_err(|e| KeeperError::Chain(format!("{} failed to confirm: {}", operation, e)))?
        .ok_or_else(|| KeeperError::Chain(format!("{} dropped from mempool", operation)))?;

    if receipt.status != Some(U64::one()) {
        return Err(KeeperError::Chain(format!(
            "{} reverted in {:?}",
            operation, receipt.transaction_hash
        )));
    }

    info!("{} confirmed: {:?}", operation, receipt.transaction_hash);
    Ok(receipt)
}

/// Chainlink-style price aggregator
pub struct OracleContract {
    provider: Arc<ChainProvider>,
    address: Address,
}

impl OracleContract {
    pub fn new(provider: Arc<ChainProvider>, address: Address) -> Self {
        Self { provider, address }
    }
}

#[async_trait]
impl PriceOracle for OracleContract {
    async fn latest_price(&self) -> KeeperResult<PriceReading> {
        let contract = IAggregator::new(self.address, self.provider.client());
        let (_, answer, _, updated_at, _) = contract
            .latest_round_data()
            .call()
            .await
            .map_err(|e| read_failed(&self.provider, e))?;

        Ok(PriceReading {
            price: answer,
            updated_at: updated_at.min(U256::from(u64::MAX)).as_u64(),
        })
    }
}

/// Wrapped native token (deposit-to-wrap)
pub struct WrappedTokenContract {
    provider: Arc<ChainProvider>,
    address: Address,
}

impl WrappedTokenContract {
    pub fn new(provider: Arc<ChainProvider>, address: Address) -> Self {
        Self { provider, address }
    }
}

#[async_trait]
impl WrappedToken for WrappedTokenContract {
    async fn native_balance(&self, account: Address) -> KeeperResult<U256> {
        self.provider.get_balance(account).await
    }

    async fn balance_of(&self, account: Address) -> KeeperResult<U256> {
        IWrappedNative::new(self.address, self.provider.client())
            .balance_of(account)
            .call()
            .await
            .map_err(|e| read_failed(&self.provider, e))
    }

    async fn deposit(&self, amount: U256) -> KeeperResult<()> {
        let contract = IWrappedNative::new(self.address, self.provider.client());
        submit(contract.deposit().value(amount), "wrap").await?;
        Ok(())
    }
}

/// Deposit contract withdrawal claims
pub struct RewardClaimContract {
    provider: Arc<ChainProvider>,
    address: Address,
}

impl RewardClaimContract {
    pub fn new(provider: Arc<ChainProvider>, address: Address) -> Self {
        Self { provider, address }
    }
}

#[async_trait]
impl RewardClaim for RewardClaimContract {
    async fn withdrawable_amount(&self, account: Address) -> KeeperResult<U256> {
        IDepositContract::new(self.address, self.provider.client())
            .withdrawable_amount(account)
            .call()
            .await
            .map_err(|e| read_failed(&self.provider, e))
    }

    async fn claim_withdrawal(&self, account: Address) -> KeeperResult<()> {
        let contract = IDepositContract::new(self.address, self.provider.client());
        submit(contract.claim_withdrawal(account), "claim withdrawal").await?;
        Ok(())
    }
}

/// ERC-677 target token
pub struct TargetTokenContract {
    provider: Arc<ChainProvider>,
    address: Address,
}

impl TargetTokenContract {
    pub fn new(provider: Arc<ChainProvider>, address: Address) -> Self {
        Self { provider, address }
    }
}

#[async_trait]
impl TargetToken for TargetTokenContract {
    async fn balance_of(&self, account: Address) -> KeeperResult<U256> {
        IErc677::new(self.address, self.provider.client())
            .balance_of(account)
            .call()
            .await
            .map_err(|e| read_failed(&self.provider, e))
    }

    async fn transfer_and_call(
        &self,
        to: Address,
        amount: U256,
        payload: Bytes,
    ) -> KeeperResult<bool> {
        let contract = IErc677::new(self.address, self.provider.client());
        let call = contract.transfer_and_call(to, amount, payload);

        // Simulate first so a `false` return is reported without spending gas
        let accepted = call
            .call()
            .await
            .map_err(|e| KeeperError::Chain(format!("transferAndCall simulation: {}", e)))?;
        if !accepted {
            return Ok(false);
        }

        submit(call, "transferAndCall").await?;
        Ok(true)
    }
}

/// Settlement contract, read once at initialization
pub struct SettlementContract {
    provider: Arc<ChainProvider>,
    address: Address,
}

impl SettlementContract {
    pub fn new(provider: Arc<ChainProvider>, address: Address) -> Self {
        Self { provider, address }
    }
}

#[async_trait]
impl Settlement for SettlementContract {
    fn address(&self) -> Address {
        self.address
    }

    async fn domain_separator(&self) -> KeeperResult<H256> {
        ISettlement::new(self.address, self.provider.client())
            .domain_separator()
            .call()
            .await
            .map(H256)
            .map_err(|e| read_failed(&self.provider, e))
    }
}
