//! Shared ledger handle
//!
//! Ledger operations are serialized: every mutation takes the write lock for
//! its whole duration, so no other call observes a half-applied operation.

use crate::staking::StakingEscrow;
use parking_lot::RwLock;
use std::sync::Arc;

/// Cloneable, thread-safe access to one [`StakingEscrow`]
#[derive(Clone, Debug)]
pub struct EscrowHandle {
    inner: Arc<RwLock<StakingEscrow>>,
}

impl EscrowHandle {
    pub fn new(escrow: StakingEscrow) -> Self {
        Self {
            inner: Arc::new(RwLock::new(escrow)),
        }
    }

    /// Run a query against the ledger
    pub fn read<R>(&self, f: impl FnOnce(&StakingEscrow) -> R) -> R {
        f(&self.inner.read())
    }

    /// Run an operation with exclusive access
    pub fn write<R>(&self, f: impl FnOnce(&mut StakingEscrow) -> R) -> R {
        f(&mut self.inner.write())
    }
}
