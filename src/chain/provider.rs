//! Chain provider with multi-RPC support and automatic failover

use crate::config::ChainConfig;
use crate::error::{KeeperError, KeeperResult};

use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Provider that signs with the keeper wallet
pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// Signing clients, one per RPC URL
    clients: Vec<Arc<SignerClient>>,
    /// Current active client index
    current: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub async fn new(config: ChainConfig, wallet: LocalWallet) -> KeeperResult<Self> {
        let wallet = wallet.with_chain_id(config.chain_id);
        let mut clients = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(500));
                    clients.push(Arc::new(SignerMiddleware::new(provider, wallet.clone())));
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if clients.is_empty() {
            return Err(KeeperError::Chain(format!(
                "No valid RPC providers for chain {}",
                config.chain_id
            )));
        }

        let remote_chain_id = clients[0]
            .get_chainid()
            .await
            .map_err(|e| KeeperError::Chain(e.to_string()))?;
        if remote_chain_id != U256::from(config.chain_id) {
            return Err(KeeperError::Config(format!(
                "RPC reports chain {} but {} is configured",
                remote_chain_id, config.chain_id
            )));
        }

        Ok(Self {
            config,
            clients,
            current: AtomicUsize::new(0),
        })
    }

    /// Get the active signing client
    pub fn client(&self) -> Arc<SignerClient> {
        let idx = self.current.load(Ordering::Relaxed);
        self.clients[idx % self.clients.len()].clone()
    }

    /// Number of configured clients, the failover budget for one call
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.clients.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> KeeperResult<u64> {
        for _ in 0..self.clients.len() {
            match self.client().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(KeeperError::Chain(format!(
            "All providers failed for chain {}",
            self.config.chain_id
        )))
    }

    /// Native balance of `account` with failover
    pub async fn get_balance(&self, account: Address) -> KeeperResult<U256> {
        for _ in 0..self.clients.len() {
            match self.client().get_balance(account, None).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!("Failed to get balance on chain {}: {}", self.config.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(KeeperError::Chain(format!(
            "All providers failed to get balance on chain {}",
            self.config.chain_id
        )))
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }

    /// Get chain ID
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Address transactions are signed from
    pub fn wallet_address(&self) -> Address {
        self.client().address()
    }
}
