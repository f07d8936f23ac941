//! Configuration management for the validator keeper
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::account::AccountAddresses;

use anyhow::{Context, Result};
use ethers::types::{Address, H256};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub keeper: KeeperConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chain: ChainConfig,
    pub account: AccountSettings,
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    pub instance_id: String,
    pub poll_interval_secs: u64,
    pub health_check_interval_secs: u64,
    /// Upper bound on validators funded in one poll
    #[serde(default = "default_max_deposits")]
    pub max_deposits_per_poll: usize,
}

fn default_max_deposits() -> usize {
    16
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

/// Chain connection and the contracts the account talks to
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    pub oracle: String,
    pub wrapped_token: String,
    pub target_token: String,
    pub reward_claim: String,
    pub deposit_contract: String,
    pub settlement: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountSettings {
    pub address: String,
    pub owner: String,
    pub app_data: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the signer key
    pub private_key_env: String,
}

/// Parsed contract addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub oracle: Address,
    pub wrapped_token: Address,
    pub target_token: Address,
    pub reward_claim: Address,
    pub deposit_contract: Address,
    pub settlement: Address,
}

impl Settings {
    /// Load settings from `KEEPER_CONFIG` or `config/default.toml`
    pub fn load() -> Result<Self> {
        let config_path = env::var("KEEPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::parse(&config_str)
    }

    /// Parse settings from TOML text
    pub fn parse(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.keeper.poll_interval_secs == 0 {
            anyhow::bail!("keeper.poll_interval_secs must be positive");
        }
        if self.chain.rpc_urls.iter().all(|url| url.trim().is_empty()) {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.chain_id);
        }
        if self.wallet.private_key_env.is_empty() {
            anyhow::bail!("wallet.private_key_env must name an environment variable");
        }

        self.contracts()?;
        self.account_addresses()?;
        self.owner()?;
        self.app_data()?;

        Ok(())
    }

    pub fn contracts(&self) -> Result<ContractAddresses> {
        let chain = &self.chain;
        Ok(ContractAddresses {
            oracle: parse_address("chain.oracle", &chain.oracle)?,
            wrapped_token: parse_address("chain.wrapped_token", &chain.wrapped_token)?,
            target_token: parse_address("chain.target_token", &chain.target_token)?,
            reward_claim: parse_address("chain.reward_claim", &chain.reward_claim)?,
            deposit_contract: parse_address("chain.deposit_contract", &chain.deposit_contract)?,
            settlement: parse_address("chain.settlement", &chain.settlement)?,
        })
    }

    /// Addresses the account itself operates with
    pub fn account_addresses(&self) -> Result<AccountAddresses> {
        let contracts = self.contracts()?;
        Ok(AccountAddresses {
            account: parse_address("account.address", &self.account.address)?,
            wrapped_token: contracts.wrapped_token,
            target_token: contracts.target_token,
            deposit_contract: contracts.deposit_contract,
        })
    }

    /// Transactions are sent from the signer, so it must be the account
    pub fn ensure_signer(&self, signer: Address) -> Result<()> {
        let account = parse_address("account.address", &self.account.address)?;
        if signer != account {
            anyhow::bail!(
                "signer {:?} is not account.address {:?}; the keeper must sign as the account",
                signer,
                account
            );
        }
        Ok(())
    }

    pub fn owner(&self) -> Result<Address> {
        parse_address("account.owner", &self.account.owner)
    }

    pub fn app_data(&self) -> Result<H256> {
        self.account
            .app_data
            .parse::<H256>()
            .map_err(|e| anyhow::anyhow!("account.app_data is not a 32-byte hex value: {}", e))
    }
}

fn parse_address(field: &str, value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| anyhow::anyhow!("{} is not a valid address ({:?}): {}", field, value, e))
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
