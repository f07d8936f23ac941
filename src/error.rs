//! Error types for the validator keeper

use ethers::types::H256;
use thiserror::Error;

/// Main error type for account and keeper operations
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Caller is not the account owner")]
    Unauthorized,

    #[error("Account already initialized")]
    AlreadyInitialized,

    #[error("Account not initialized")]
    NotInitialized,

    #[error("Validator {0:?} already exists")]
    ValidatorAlreadyExists(H256),

    #[error("Validator {0:?} does not exist")]
    ValidatorDoesNotExist(H256),

    #[error("Validator registry is empty")]
    EmptyRegistry,

    #[error("Argument length mismatch: {ids} ids, {pubkeys} pubkeys, {signatures} signatures")]
    LengthMismatch {
        ids: usize,
        pubkeys: usize,
        signatures: usize,
    },

    #[error("Order not valid: {0}")]
    OrderNotValid(String),

    #[error("Order hash does not match the signed payload")]
    InvalidHash,

    #[error("Malformed signature payload: {0}")]
    InvalidSignaturePayload(String),

    #[error("Poll again at epoch {epoch}: {reason}")]
    PollTryAtEpoch { epoch: u64, reason: String },

    #[error("Failed to deposit validator {0:?}")]
    FailedToDeposit(H256),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KeeperError {
    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            KeeperError::Unauthorized => "unauthorized",
            KeeperError::AlreadyInitialized => "already_initialized",
            KeeperError::NotInitialized => "not_initialized",
            KeeperError::ValidatorAlreadyExists(_) => "validator_already_exists",
            KeeperError::ValidatorDoesNotExist(_) => "validator_does_not_exist",
            KeeperError::EmptyRegistry => "empty_registry",
            KeeperError::LengthMismatch { .. } => "length_mismatch",
            KeeperError::OrderNotValid(_) => "order_not_valid",
            KeeperError::InvalidHash => "invalid_hash",
            KeeperError::InvalidSignaturePayload(_) => "invalid_signature_payload",
            KeeperError::PollTryAtEpoch { .. } => "poll_try_at_epoch",
            KeeperError::FailedToDeposit(_) => "failed_to_deposit",
            KeeperError::Chain(_) => "chain",
            KeeperError::Database(_) => "database",
            KeeperError::Config(_) => "config",
            KeeperError::Internal(_) => "internal",
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KeeperError::PollTryAtEpoch { .. } | KeeperError::Chain(_) | KeeperError::Database(_)
        )
    }

    /// Suggested re-poll time for retry signals
    pub fn retry_at(&self) -> Option<u64> {
        match self {
            KeeperError::PollTryAtEpoch { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }

    pub(crate) fn order_not_valid(reason: impl Into<String>) -> Self {
        KeeperError::OrderNotValid(reason.into())
    }

    pub(crate) fn try_at(epoch: u64, reason: impl Into<String>) -> Self {
        KeeperError::PollTryAtEpoch {
            epoch,
            reason: reason.into(),
        }
    }
}

/// Result type for keeper operations
pub type KeeperResult<T> = Result<T, KeeperError>;
