//! Error types for the stpool system

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid operator state: {0}")]
    InvalidState(String),

    #[error("Operator not found: {0}")]
    OperatorNotFound(String),

    #[error("Amount must be greater than zero")]
    ZeroAmount,

    #[error("Insufficient amount: {0}")]
    InsufficientAmount(String),

    #[error("Fee must be greater than zero")]
    ZeroFee,

    #[error("Fee claim proof is empty")]
    EmptyProof,

    #[error("Fee claim index must be greater than zero")]
    ZeroIndex,

    #[error("Submission threshold reached: cap {cap}, requested {requested}")]
    ThresholdReached { cap: u64, requested: u64 },

    #[error("Reward total {total} below minimum distribution {floor}")]
    BelowMinimumDistribution { total: u64, floor: u64 },

    #[error("Claim delay not reached: current epoch {current}, unlock epoch {unlock}")]
    ClaimDelayNotReached { current: u64, unlock: u64 },

    #[error("Requested {requested} exceeds withdrawable stake {available}")]
    TooMuchToWithdraw { requested: u64, available: u64 },

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Operations are paused")]
    Paused,

    #[error("Withdrawal ticket not found: {0}")]
    TicketNotFound(u64),

    #[error("Validator account error: {0}")]
    Validator(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
