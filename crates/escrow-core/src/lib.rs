//! # Escrow Core
//!
//! Core building blocks shared by the staking escrow crates:
//! - `AccountId` / `CallContext` - who is calling and on whose behalf
//! - `Period` - discrete epoch index derived from wall-clock time
//! - `PeriodClock` - converts time into periods, rescales periods between lengths
//! - `EscrowError` - the error taxonomy of every ledger operation
//! - `math` - checked token arithmetic with 256-bit intermediates
//!
//! ```text
//!   time (secs) ──► PeriodClock ──► Period ──► StakingEscrow / Issuer
//!                        ▲
//!                 SystemClock | ManualClock
//! ```

pub mod clock;
pub mod error;
pub mod math;
pub mod types;

pub use clock::*;
pub use error::*;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, PeriodClock, SystemClock};
    pub use crate::error::{ErrorKind, EscrowError, Result};
    pub use crate::types::*;
}
