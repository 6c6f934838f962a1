//! # Escrow Ledger - Staking, Issuance & Slashing
//!
//! Period-based stake ledger for re-encryption node operators.
//!
//! ## Key Features
//!
//! - **Sub-stakes**: every staker holds up to 30 independently timed locks
//! - **Commitments**: a bonded worker commits to the next period, which realizes
//!   the reward of already finished committed periods
//! - **Two-phase issuance**: flat first-phase pool, then a pool decaying with the
//!   remaining supply
//! - **Slashing**: shortest-first shrinking of sub-stakes that never touches the
//!   reward base of periods committed before the slash
//!
//! ## Period Flow
//!
//! ```text
//! period:        N              N+1             N+2
//!            ┌────────┐     ┌────────┐     ┌────────┐
//!  commit ──►│ lock   │     │ active │     │ minted │
//!            │ for N+1│────►│ (N+1)  │────►│ reward │
//!            └────────┘     └────────┘     │ of N+1 │
//!                                          └────────┘
//!  lockedPerPeriod[N+1] += locked tokens at commitment
//! ```
//!
//! ## Reward Formula
//!
//! | Phase | Pool | Coefficient |
//! |-------|------|-------------|
//! | 1 | `firstPhaseMaxIssuance` | `k2` |
//! | 2 | `totalSupply - previousPeriodSupply` | `d * k2` |
//!
//! `reward = pool * lockedValue * (k1 + min(lockedPeriods, maxRewardedPeriods)) / (totalLocked * coefficient)`

pub mod adjudicator;
pub mod collaborators;
pub mod commitment;
pub mod config;
pub mod events;
pub mod handle;
pub mod issuer;
pub mod migration;
pub mod sampling;
pub mod slashing;
pub mod snapshot;
pub mod staker;
pub mod staking;
pub mod substake;
pub mod workers;

mod txn;

// Re-exports
pub use adjudicator::{Adjudicator, AdjudicatorParams, CfragVerdict, ReencryptionEvidence};
pub use commitment::MintOutcome;
pub use collaborators::{
    CfragVerifier, FeeLedger, FeeLedgerCall, InMemoryToken, NoopFeeLedger, RecordingFeeLedger,
    TokenCustody, VerifierOutcome,
};
pub use config::{ConfigError, EscrowConfig};
pub use events::EscrowEvent;
pub use handle::EscrowHandle;
pub use issuer::{IssuanceParams, IssuancePhase, Issuer, IssuerState};
pub use snapshot::{EscrowSnapshot, SNAPSHOT_VERSION};
pub use staker::{CommittedPeriods, LockBreakdown, StakerFlags, StakerInfo};
pub use staking::{Authorities, BatchDeposit, Collaborators, StakingEscrow, StakingParams};
pub use migration::migrate_staker;
pub use substake::{Downtime, SubStake, SubStakes};

/// Token constants
pub mod constants {
    /// Decimal places of the staked token
    pub const DECIMALS: u8 = 18;

    /// One token in smallest unit
    pub const ONE_TOKEN: u128 = 1_000_000_000_000_000_000; // 10^18

    /// Maximum number of sub-stakes per staker
    pub const MAX_SUB_STAKES: usize = 30;
}

pub use constants::*;
