use crate::domain::request::WithdrawalStatus;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, WithdrawalError>;

#[derive(Error, Debug)]
pub enum WithdrawalError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Invalid release: reserved {reserved}, requested {requested}")]
    InvalidReleaseState {
        reserved: Decimal,
        requested: Decimal,
    },
    #[error("Invalid debit: reserved {reserved}, requested {requested}")]
    InvalidDebitState {
        reserved: Decimal,
        requested: Decimal,
    },
    #[error("Ledger version conflict for user {0}")]
    VersionConflict(Uuid),
    #[error("Ledger contention for user {user}: gave up after {attempts} attempts")]
    LedgerContention { user: Uuid, attempts: u32 },
    #[error("No ledger entry for user {0}")]
    LedgerEntryNotFound(Uuid),
    #[error("Withdrawal request {0} not found")]
    RequestNotFound(Uuid),
    #[error("Stale request state: expected {expected}, found {found}")]
    StaleRequestState {
        expected: WithdrawalStatus,
        found: WithdrawalStatus,
    },
    #[error("Payout gateway error: {0}")]
    Gateway(String),
    #[error("Payout gateway timed out after {0}ms")]
    GatewayTimeout(u64),
    #[error("Internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for WithdrawalError {
    fn from(e: rocksdb::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}

impl From<serde_json::Error> for WithdrawalError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}

impl From<std::io::Error> for WithdrawalError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(Box::new(e))
    }
}
