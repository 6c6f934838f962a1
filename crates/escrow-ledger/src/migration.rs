//! Period-length migration
//!
//! When the period length changes, staker records written on the old
//! (genesis) scale are rescaled lazily: on the staker's next commitment or
//! through an explicit [`StakingEscrow::migrate`] call.

use crate::events::EscrowEvent;
use crate::staker::StakerInfo;
use crate::staking::StakingEscrow;
use crate::txn::Transaction;
use escrow_core::{AccountId, PeriodClock, Result};
use tracing::info;

/// Rescale a staker record from the genesis period length to the active one.
///
/// Pending commitments and downtime are dropped, fixed periods are rescaled
/// and the remaining duration of open sub-stakes is recomputed from the point
/// in time where they would have ended. A record that is already migrated is
/// returned unchanged.
pub fn migrate_staker(info: &StakerInfo, clock: &PeriodClock) -> StakerInfo {
    let mut migrated = info.clone();
    if info.flags.migrated {
        return migrated;
    }
    let current = clock.current_period();
    let genesis_current = clock.genesis_current_period();

    migrated.committed.reset();
    migrated.last_committed_period = Some(1);
    migrated.worker_start_period = clock.recalculate_period(info.worker_start_period);
    migrated.past_downtime.clear();

    for sub in migrated.sub_stakes.iter_mut() {
        sub.first_period = clock.recalculate_period(sub.first_period);
        sub.reward_last_period = None;
        match sub.last_period {
            Some(last) => {
                sub.last_period = Some(clock.recalculate_period(last));
                sub.unlocking_duration = 0;
            }
            None => {
                let last = clock
                    .recalculate_period(genesis_current.saturating_add(sub.unlocking_duration));
                sub.unlocking_duration = last.saturating_sub(current);
                if sub.unlocking_duration == 0 {
                    sub.last_period = Some(last);
                }
            }
        }
    }
    migrated.flags.migrated = true;
    migrated
}

impl StakingEscrow {
    /// Migrate a staker record; returns `false` when it already was
    pub fn migrate(&mut self, staker: AccountId) -> Result<bool> {
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let info = txn.existing_staker(staker)?;
        if info.flags.migrated {
            return Ok(false);
        }
        let migrated = migrate_staker(&info, self.clock());
        txn.emit(EscrowEvent::Migrated {
            staker,
            period: current,
        });
        txn.store_staker(staker, migrated);
        let changes = txn.finish();

        self.collaborators.fee_ledger.migrate(staker)?;
        info!(%staker, current, "Staker migrated");
        self.apply(changes);
        Ok(true)
    }
}
