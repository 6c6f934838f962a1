//! Error types for staking escrow operations

use crate::types::{AccountId, Period, TokenAmount};
use thiserror::Error;

/// Result type alias for escrow operations
pub type Result<T> = std::result::Result<T, EscrowError>;

/// Broad failure class of an [`EscrowError`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The call was rejected before any state change
    Precondition,
    /// A checked arithmetic operation overflowed
    ArithmeticOverflow,
    /// Ledger bookkeeping disagrees with itself
    ConsistencyBreach,
    /// A collaborator (token custody, fee ledger, verifier) failed
    Collaborator,
    /// Deployment parameters are unusable
    Configuration,
}

/// Errors that can occur in staking escrow operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    // === Lifecycle ===
    #[error("Escrow is not initialized")]
    NotInitialized,

    #[error("Escrow is already initialized")]
    AlreadyInitialized,

    #[error("Reserved reward {reserved} is outside [{minimum}, {maximum}]")]
    InvalidReservedReward {
        reserved: TokenAmount,
        minimum: TokenAmount,
        maximum: TokenAmount,
    },

    // === Access control ===
    #[error("Caller {0} is not authorized for this operation")]
    Unauthorized(AccountId),

    #[error("Caller {0} must act directly, not through a relay")]
    RelayedCall(AccountId),

    #[error("Account {0} holds no stake")]
    NotAStaker(AccountId),

    #[error("Account {0} is already a staker")]
    AlreadyStaker(AccountId),

    #[error("Account {0} is not bonded to any staker")]
    UnknownWorker(AccountId),

    #[error("Staker {0} has not been migrated to the current period length")]
    NotMigrated(AccountId),

    // === Stake management ===
    #[error("Value must be greater than zero")]
    ZeroValue,

    #[error("Value {value} is below the minimum of {minimum}")]
    BelowMinimum {
        value: TokenAmount,
        minimum: TokenAmount,
    },

    #[error("Duration of {periods} periods is below the minimum of {minimum}")]
    DurationTooShort { periods: u32, minimum: u32 },

    #[error("Locking {requested} would exceed the staker balance of {available}")]
    ExceedsBalance {
        requested: TokenAmount,
        available: TokenAmount,
    },

    #[error("Locking {requested} would exceed the maximum of {maximum}")]
    ExceedsMaximum {
        requested: TokenAmount,
        maximum: TokenAmount,
    },

    #[error("Sub-stake index {index} is out of range ({len} sub-stakes)")]
    SubStakeIndexOutOfRange { index: usize, len: usize },

    #[error("Sub-stake {index} must be active at least in the next period")]
    SubStakeInactive { index: usize },

    #[error("Sub-stake {index} is still in use")]
    SubStakeInUse { index: usize },

    #[error("Sub-stake limit of {max} reached")]
    SubStakeLimitReached { max: usize },

    #[error("Sub-stakes must be different")]
    SameSubStake,

    #[error("Sub-stakes end in different periods ({first} and {second})")]
    LastPeriodMismatch { first: Period, second: Period },

    #[error("Requested {requested} but only {available} is unlocked")]
    InsufficientUnlocked {
        requested: TokenAmount,
        available: TokenAmount,
    },

    // === Commitment ===
    #[error("Period {0} is already committed")]
    AlreadyCommitted(Period),

    #[error("Nothing is locked for the next period")]
    NothingLocked,

    // === Workers ===
    #[error("Worker {0} is already bonded with this staker")]
    WorkerAlreadyBonded(AccountId),

    #[error("Worker {0} is already in use")]
    WorkerInUse(AccountId),

    #[error("Worker {0} is itself a staker")]
    WorkerIsStaker(AccountId),

    #[error("Worker can be changed from period {available_from}")]
    WorkerCooldown { available_from: Period },

    // === Adjudication ===
    #[error("Re-encryption fragment was already evaluated")]
    AlreadyEvaluated,

    #[error("Penalty must be greater than zero")]
    ZeroPenalty,

    // === Sampling ===
    #[error("Sample points must be sorted in ascending order")]
    UnsortedPoints,

    // === Arithmetic ===
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),

    // === Consistency ===
    #[error("Ledger invariant violated: {0}")]
    InvariantViolation(String),

    // === Collaborators ===
    #[error("Token transfer failed: {0}")]
    TokenTransfer(String),

    #[error("Fee ledger rejected the call: {0}")]
    FeeLedger(String),

    #[error("Verifier failed: {0}")]
    Verifier(String),

    // === Configuration ===
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl EscrowError {
    /// Failure class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Overflow(_) => ErrorKind::ArithmeticOverflow,
            Self::InvariantViolation(_) => ErrorKind::ConsistencyBreach,
            Self::TokenTransfer(_) | Self::FeeLedger(_) | Self::Verifier(_) => {
                ErrorKind::Collaborator
            }
            Self::InvalidConfiguration(_) | Self::Snapshot(_) => ErrorKind::Configuration,
            _ => ErrorKind::Precondition,
        }
    }

    /// Numeric error code for API responses
    pub fn code(&self) -> u32 {
        match self {
            Self::NotInitialized | Self::AlreadyInitialized | Self::InvalidReservedReward { .. } => {
                2001
            }
            Self::Unauthorized(_) | Self::RelayedCall(_) => 2002,
            Self::NotAStaker(_)
            | Self::AlreadyStaker(_)
            | Self::UnknownWorker(_)
            | Self::NotMigrated(_) => 2003,
            Self::ZeroValue
            | Self::BelowMinimum { .. }
            | Self::DurationTooShort { .. }
            | Self::ExceedsBalance { .. }
            | Self::ExceedsMaximum { .. }
            | Self::InsufficientUnlocked { .. } => 2004,
            Self::SubStakeIndexOutOfRange { .. }
            | Self::SubStakeInactive { .. }
            | Self::SubStakeInUse { .. }
            | Self::SubStakeLimitReached { .. }
            | Self::SameSubStake
            | Self::LastPeriodMismatch { .. } => 2005,
            Self::AlreadyCommitted(_) | Self::NothingLocked => 2006,
            Self::WorkerAlreadyBonded(_)
            | Self::WorkerInUse(_)
            | Self::WorkerIsStaker(_)
            | Self::WorkerCooldown { .. } => 2007,
            Self::AlreadyEvaluated | Self::ZeroPenalty => 2008,
            Self::UnsortedPoints => 2009,
            Self::Overflow(_) => 3001,
            Self::InvariantViolation(_) => 3002,
            Self::TokenTransfer(_) | Self::FeeLedger(_) | Self::Verifier(_) => 4001,
            Self::InvalidConfiguration(_) | Self::Snapshot(_) => 5001,
        }
    }
}
