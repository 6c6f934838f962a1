//! Slashing
//!
//! A penalty first reduces the staker's value. If the locks no longer fit into
//! what is left, sub-stakes are shrunk shortest-first: the current period is
//! repaired first, then the next one. Value taken from a sub-stake that still
//! backs an unminted commitment before the decrease period is preserved as a
//! closed copy. Copies and closed sub-stakes remember the end they had before
//! the cut, so neither the network total nor the staker's reward for that
//! period changes.

use crate::events::EscrowEvent;
use crate::migration::migrate_staker;
use crate::staker::StakerInfo;
use crate::staking::StakingEscrow;
use crate::txn::Transaction;
use escrow_core::{AccountId, EscrowError, Period, Result, TokenAmount};
use tracing::{info, warn};

impl StakingEscrow {
    /// Slash `penalty` from `staker`, paying `reward` of it to `investigator`.
    ///
    /// Only the adjudicator may call this. The penalty is capped at the
    /// staker's value and the reward at the penalty; returns the applied penalty.
    /// A record still on the genesis period length is migrated first.
    pub fn slash(
        &mut self,
        caller: AccountId,
        staker: AccountId,
        penalty: TokenAmount,
        investigator: AccountId,
        reward: TokenAmount,
    ) -> Result<TokenAmount> {
        if caller != self.authorities().adjudicator {
            warn!(%caller, %staker, "Rejected slash from non-adjudicator");
            return Err(EscrowError::Unauthorized(caller));
        }
        if penalty == 0 {
            return Err(EscrowError::ZeroPenalty);
        }
        let current = self.current_period();
        let next = current + 1;
        let mut txn = Transaction::new(&self.state);
        let mut info = txn.existing_staker(staker)?;
        let migrated = !info.flags.migrated;
        if migrated {
            info = migrate_staker(&info, self.clock());
            txn.emit(EscrowEvent::Migrated {
                staker,
                period: current,
            });
        }

        let penalty = penalty.min(info.value);
        let reward = reward.min(penalty);
        info.value -= penalty;

        let start = info.start_period(current);
        let breakdown = info.lock_breakdown(current);
        let locked_now = breakdown
            .current_lock
            .saturating_add(breakdown.current_and_next_lock);
        if info.value < locked_now {
            let shortfall = locked_now - info.value;
            decrease_sub_stakes(
                &mut txn,
                &mut info,
                shortfall,
                current,
                start,
                breakdown.shortest,
                current,
            )?;
        }
        let locked_next = info.locked_tokens(current, next);
        if info.value < locked_next {
            let shortfall = locked_next - info.value;
            decrease_sub_stakes(
                &mut txn,
                &mut info,
                shortfall,
                next,
                start,
                None,
                current,
            )?;
        }

        if penalty > reward {
            txn.issuer.un_mint(penalty - reward)?;
        }
        txn.emit(EscrowEvent::Slashed {
            staker,
            penalty,
            investigator,
            reward,
        });
        txn.store_staker(staker, info);
        let changes = txn.finish();

        if migrated {
            self.collaborators.fee_ledger.migrate(staker)?;
        }
        if reward > 0 {
            self.collaborators
                .token
                .transfer(self.authorities().custody, investigator, reward)?;
        }
        info!(%staker, %penalty, %reward, current, "Slash applied");
        self.apply(changes);
        Ok(penalty)
    }
}

/// Take `amount` out of the sub-stakes active in `decrease_period`,
/// shortest first, starting with `shortest` when the caller already knows it.
fn decrease_sub_stakes(
    txn: &mut Transaction<'_>,
    info: &mut StakerInfo,
    mut amount: TokenAmount,
    decrease_period: Period,
    start: Period,
    mut shortest: Option<usize>,
    current: Period,
) -> Result<()> {
    while amount > 0 {
        let index = match shortest
            .take()
            .or_else(|| info.shortest_sub_stake(decrease_period, start))
        {
            Some(index) => index,
            None => break,
        };
        let sub = *info.sub_stakes.get(index)?;
        let last = sub.last_period_from(start);

        let applied = if amount < sub.locked_value {
            info.sub_stakes.get_mut(index)?.locked_value -= amount;
            info.save_old_sub_stake(
                sub.first_period,
                amount,
                sub.reward_last_period_from(start),
                decrease_period,
                current,
            )?;
            amount
        } else {
            info.sub_stakes
                .get_mut(index)?
                .cut_at(decrease_period.saturating_sub(1), start);
            sub.locked_value
        };
        amount -= applied;

        for period in info.committed.pending() {
            if period >= decrease_period && period <= last && period >= sub.first_period {
                txn.sub_locked(period, applied)?;
            }
        }
    }

    if amount > 0 {
        return Err(EscrowError::InvariantViolation(format!(
            "{amount} still locked above the staker value after slashing"
        )));
    }
    Ok(())
}
