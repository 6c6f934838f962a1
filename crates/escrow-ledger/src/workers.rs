//! Worker bonding
//!
//! Each staker operates through exactly one worker identity and every worker
//! serves exactly one staker. Changing the worker is rate limited by a
//! cooldown counted from the previous change.

use crate::events::EscrowEvent;
use crate::staking::{active_staker, StakingEscrow};
use crate::txn::Transaction;
use escrow_core::{AccountId, EscrowError, Result};
use tracing::debug;

impl StakingEscrow {
    /// Bond `worker` to `staker`, or unbond the current worker with `None`
    pub fn bond_worker(&mut self, staker: AccountId, worker: Option<AccountId>) -> Result<()> {
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;
        if info.value == 0 {
            return Err(EscrowError::NotAStaker(staker));
        }
        if worker == info.worker {
            return match worker {
                Some(worker) => Err(EscrowError::WorkerAlreadyBonded(worker)),
                None => Ok(()),
            };
        }

        if let Some(previous) = info.worker {
            let available_from = info
                .worker_start_period
                .saturating_add(self.params().min_worker_periods);
            if current < available_from {
                return Err(EscrowError::WorkerCooldown { available_from });
            }
            txn.unlink_worker(previous);
        }

        if let Some(worker) = worker {
            if txn.staker_from_worker(worker).is_some() {
                return Err(EscrowError::WorkerInUse(worker));
            }
            let has_own_stake = txn
                .staker(worker)
                .map(|w| !w.sub_stakes.is_empty())
                .unwrap_or(false);
            if worker != staker && has_own_stake {
                return Err(EscrowError::WorkerIsStaker(worker));
            }
            txn.link_worker(worker, staker);
        }

        info.worker = worker;
        info.worker_start_period = current;
        txn.emit(EscrowEvent::WorkerBonded {
            staker,
            worker,
            start_period: current,
        });
        txn.store_staker(staker, info);
        let changes = txn.finish();
        debug!(%staker, ?worker, current, "Worker bonded");
        self.apply(changes);
        Ok(())
    }
}
