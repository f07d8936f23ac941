//! Validator Keeper - staking validator account with automated reward conversion
//!
//! The keeper hosts a validator account: it queues validator deposits, funds
//! them from the target asset, and converts the wrapped native balance into
//! the target asset through settlement orders that the account authorizes.

use anyhow::{Context, Result};
use ethers::signers::{LocalWallet, Signer};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod account;
mod api;
mod chain;
mod config;
mod error;
mod events;
mod keeper;
mod metrics;
mod order;
mod registry;
mod state;

use account::ValidatorAccount;
use api::{AppState, Readiness, ServiceReadiness};
use chain::{
    ChainProvider, Collaborators, OracleContract, RewardClaimContract, SettlementContract,
    SystemClock, TargetTokenContract, WrappedTokenContract,
};
use config::{Settings, WalletConfig};
use keeper::Keeper;
use metrics::MetricsServer;
use state::StateManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Validator Keeper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    let addresses = settings.account_addresses()?;
    let contracts = settings.contracts()?;
    info!(
        "Loaded configuration for account {:?} on chain {}",
        addresses.account, settings.chain.chain_id
    );

    // Initialize database connection
    let state_manager = Arc::new(StateManager::new(&settings.database, addresses.account).await?);
    info!("Database connection established");

    // Run migrations
    state_manager.run_migrations().await?;

    // Connect to the chain
    let wallet = load_wallet(&settings.wallet)?;
    settings.ensure_signer(wallet.address())?;
    let provider = Arc::new(ChainProvider::new(settings.chain.clone(), wallet).await?);
    info!(
        "Connected to chain {} with {} RPC endpoints as {:?}",
        provider.chain_id(),
        provider.client_count(),
        provider.wallet_address()
    );

    let clock = Arc::new(SystemClock);
    let collaborators = Collaborators {
        oracle: Arc::new(OracleContract::new(provider.clone(), contracts.oracle)),
        wrapped: Arc::new(WrappedTokenContract::new(
            provider.clone(),
            contracts.wrapped_token,
        )),
        rewards: Arc::new(RewardClaimContract::new(
            provider.clone(),
            contracts.reward_claim,
        )),
        target: Arc::new(TargetTokenContract::new(
            provider.clone(),
            contracts.target_token,
        )),
        clock: clock.clone(),
    };

    // Resume the account from storage
    let stored_config = state_manager.load_account().await?;
    let registry = state_manager
        .load_registry(registry::registry_namespace())
        .await?;
    info!("Restored {} pending validators", registry.len());

    let account = Arc::new(ValidatorAccount::with_state(
        addresses,
        collaborators,
        state_manager.clone(),
        stored_config,
        registry,
    ));

    match account.config().await {
        Some(config) => {
            if config.owner != settings.owner()? {
                warn!(
                    "Configured owner differs from stored owner {:?}; the stored owner applies",
                    config.owner
                );
            }
        }
        None => {
            let settlement = SettlementContract::new(provider.clone(), contracts.settlement);
            account
                .initialize(settings.owner()?, settings.app_data()?, &settlement)
                .await?;
        }
    }

    let keeper = Arc::new(Keeper::new(
        account.clone(),
        state_manager.clone(),
        clock,
        settings.keeper.clone(),
    ));
    let readiness = Arc::new(ServiceReadiness::new(
        state_manager.clone(),
        provider.clone(),
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = AppState {
            account: account.clone(),
            readiness: readiness.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start keeper loop
    let keeper_handle = tokio::spawn({
        let keeper = keeper.clone();
        async move {
            if let Err(e) = keeper.run().await {
                error!("Keeper error: {}", e);
            }
        }
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let readiness = readiness.clone();
        let interval = settings.keeper.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                for component in readiness.check().await {
                    if !component.healthy {
                        warn!("{} health check failed", component.component);
                    }
                }
            }
        }
    });

    info!("Validator Keeper {} is running", settings.keeper.instance_id);
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown
    keeper.stop().await;

    // Abort background tasks
    api_handle.abort();
    keeper_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Validator Keeper stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,validator_keeper=debug,sqlx=warn,hyper=warn")
    });

    let json = env::var("KEEPER_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

fn load_wallet(config: &WalletConfig) -> Result<LocalWallet> {
    let key = env::var(&config.private_key_env)
        .with_context(|| format!("{} is not set", config.private_key_env))?;
    key.trim()
        .parse::<LocalWallet>()
        .with_context(|| format!("{} does not hold a valid private key", config.private_key_env))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
