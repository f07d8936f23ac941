//! Keeper loop driving the account
//!
//! Each poll wraps and claims, funds queued validators while the target
//! balance allows, and proposes a conversion order unless the last attempt
//! asked to be retried later.

use crate::account::{AccountStore, ValidatorAccount};
use crate::chain::Clock;
use crate::config::KeeperConfig;
use crate::error::{KeeperError, KeeperResult};
use crate::events::AccountEvent;
use crate::order::{Order, ONE_UNIT};
use crate::registry::DepositId;
use crate::state::StateManager;

use async_trait::async_trait;
use ethers::types::{Bytes, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Destination for newly proposed orders
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProposalSink: Send + Sync {
    async fn publish(&self, uid: &Bytes, order: &Order) -> KeeperResult<()>;
}

#[async_trait]
impl ProposalSink for StateManager {
    async fn publish(&self, uid: &Bytes, order: &Order) -> KeeperResult<()> {
        self.record_order(uid, order).await?;
        self.record_event(&AccountEvent::OrderProposed {
            uid: uid.clone(),
            valid_to: order.valid_to,
        })
        .await
    }
}

/// What a single poll did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub wrapped: U256,
    pub claimed: U256,
    pub deposited: Vec<DepositId>,
    /// UID of a newly published proposal
    pub proposed: Option<Bytes>,
    /// Epoch before which no proposal is attempted
    pub retry_at: Option<u64>,
}

#[derive(Default)]
struct Schedule {
    retry_at: Option<u64>,
    last_uid: Option<Bytes>,
}

pub struct Keeper {
    account: Arc<ValidatorAccount>,
    proposals: Arc<dyn ProposalSink>,
    clock: Arc<dyn Clock>,
    config: KeeperConfig,
    schedule: Mutex<Schedule>,
    shutdown: Arc<RwLock<bool>>,
}

impl Keeper {
    pub fn new(
        account: Arc<ValidatorAccount>,
        proposals: Arc<dyn ProposalSink>,
        clock: Arc<dyn Clock>,
        config: KeeperConfig,
    ) -> Self {
        Self {
            account,
            proposals,
            clock,
            config,
            schedule: Mutex::new(Schedule::default()),
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Main keeper loop
    pub async fn run(&self) -> KeeperResult<()> {
        let mut poll_interval = interval(Duration::from_secs(self.config.poll_interval_secs));

        info!("Keeper {} started", self.config.instance_id);

        loop {
            poll_interval.tick().await;
            if *self.shutdown.read().await {
                break;
            }

            match self.poll().await {
                Ok(report) => debug!("Poll complete: {:?}", report),
                Err(e) if e.is_retryable() => warn!("Poll failed, retrying next interval: {}", e),
                Err(e) => error!("Poll failed: {}", e),
            }
        }

        info!("Keeper {} stopped", self.config.instance_id);
        Ok(())
    }

    /// Stop the loop after the current poll
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }

    /// Run one round of wrap, claim, deposit and propose, after saving any
    /// registry change a failed store left behind
    pub async fn poll(&self) -> KeeperResult<PollReport> {
        self.account.flush_registry().await?;

        let mut report = PollReport {
            wrapped: self.account.wrap_all().await.unwrap_or_else(|e| {
                warn!("Wrapping failed: {}", e);
                U256::zero()
            }),
            claimed: self.account.claim_all().await.unwrap_or_else(|e| {
                warn!("Claiming rewards failed: {}", e);
                U256::zero()
            }),
            ..PollReport::default()
        };

        report.deposited = self.deposit_pending().await?;
        self.propose(&mut report).await?;
        Ok(report)
    }

    async fn deposit_pending(&self) -> KeeperResult<Vec<DepositId>> {
        let mut deposited = Vec::new();

        while deposited.len() < self.config.max_deposits_per_poll {
            if self.account.pending_validators().await == 0 {
                break;
            }
            if self.account.balances().await?.target < ONE_UNIT {
                debug!("Target balance below one unit, deferring deposits");
                break;
            }

            match self.account.deposit_validator().await {
                Ok(id) => deposited.push(id),
                Err(KeeperError::FailedToDeposit(id)) => {
                    warn!("Deposit for {:?} failed, retrying next poll", id);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if !deposited.is_empty() {
            info!("Deposited {} validators", deposited.len());
        }
        Ok(deposited)
    }

    async fn propose(&self, report: &mut PollReport) -> KeeperResult<()> {
        let mut schedule = self.schedule.lock().await;
        let now = self.clock.now();

        if let Some(retry_at) = schedule.retry_at {
            if now < retry_at {
                debug!("Proposal deferred until {}", retry_at);
                report.retry_at = Some(retry_at);
                return Ok(());
            }
            schedule.retry_at = None;
        }

        let order = match self.account.propose_order().await {
            Ok(order) => order,
            Err(KeeperError::PollTryAtEpoch { epoch, reason }) => {
                info!("No order proposed ({}), retrying at {}", reason, epoch);
                schedule.retry_at = Some(epoch);
                report.retry_at = Some(epoch);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let uid = self.account.order_uid(&order).await?;
        if schedule.last_uid.as_ref() == Some(&uid) {
            debug!("Proposal unchanged: {}", uid);
            return Ok(());
        }

        self.proposals.publish(&uid, &order).await?;
        info!(
            "Proposed order {} selling {} for at least {}",
            uid, order.sell_amount, order.buy_amount
        );
        schedule.last_uid = Some(uid.clone());
        report.proposed = Some(uid);
        Ok(())
    }
}
