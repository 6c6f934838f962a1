//! Commitments and reward minting
//!
//! A worker commits its staker to the next period. The same call realizes the
//! reward of every earlier committed period that has fully elapsed, so a
//! period's reward is minted one period after it ends at the earliest.

use crate::events::EscrowEvent;
use crate::migration::migrate_staker;
use crate::staker::StakerInfo;
use crate::staking::{active_staker, StakingEscrow};
use crate::substake::Downtime;
use crate::txn::Transaction;
use escrow_core::{math, AccountId, CallContext, EscrowError, Period, Result, TokenAmount};
use tracing::{debug, warn};

/// Periods processed by one minting pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MintOutcome {
    pub first_period: Option<Period>,
    pub second_period: Option<Period>,
    pub reward: TokenAmount,
}

impl MintOutcome {
    pub fn is_empty(&self) -> bool {
        self.first_period.is_none()
    }
}

impl StakingEscrow {
    /// Commit the staker bonded to the calling worker to the next period
    pub fn commit(&mut self, ctx: CallContext) -> Result<()> {
        if !ctx.is_direct() {
            warn!(sender = %ctx.sender, origin = %ctx.origin, "Rejected relayed commitment");
            return Err(EscrowError::RelayedCall(ctx.sender));
        }
        self.require_initialized()?;
        let worker = ctx.sender;
        let current = self.current_period();
        let next = current + 1;

        let mut txn = Transaction::new(&self.state);
        let staker = txn
            .staker_from_worker(worker)
            .ok_or(EscrowError::UnknownWorker(worker))?;
        let mut info = txn.existing_staker(staker)?;
        if info.value == 0 {
            return Err(EscrowError::NotAStaker(staker));
        }

        let migrated = !info.flags.migrated;
        if migrated {
            info = migrate_staker(&info, self.clock());
            txn.emit(EscrowEvent::Migrated {
                staker,
                period: current,
            });
        }
        if info.committed.contains(next) {
            return Err(EscrowError::AlreadyCommitted(next));
        }

        let last_active = info.last_active_period();
        let minted = mint_pending(&mut txn, staker, &mut info, current)?;

        let locked = info.locked_tokens(current, next);
        if locked == 0 {
            return Err(EscrowError::NothingLocked);
        }
        txn.add_locked(next, locked)?;
        info.committed.push(next)?;

        if info.flags.wind_down {
            for sub in info.sub_stakes.iter_mut() {
                if sub.last_period.is_some() || sub.unlocking_duration == 0 {
                    continue;
                }
                sub.unlocking_duration -= 1;
                if sub.unlocking_duration == 0 {
                    sub.last_period = Some(next);
                }
            }
        }

        if let Some(last) = last_active {
            if last < current {
                info.past_downtime.push(Downtime {
                    start_period: last + 1,
                    end_period: current,
                });
            }
        }

        txn.emit(EscrowEvent::CommitmentMade {
            staker,
            period: next,
            value: locked,
        });
        txn.store_staker(staker, info);
        let changes = txn.finish();

        if migrated {
            self.collaborators.fee_ledger.migrate(staker)?;
        }
        self.collaborators.fee_ledger.ping(
            staker,
            minted.first_period,
            minted.second_period,
            Some(next),
        )?;
        debug!(%staker, %worker, next, %locked, "Committed to next period");
        self.apply(changes);
        Ok(())
    }

    /// Mint the reward of every committed period that has elapsed
    pub fn mint(&mut self, staker: AccountId) -> Result<TokenAmount> {
        self.require_initialized()?;
        let current = self.current_period();
        let mut txn = Transaction::new(&self.state);
        let mut info = active_staker(&txn, staker)?;

        let minted = mint_pending(&mut txn, staker, &mut info, current)?;
        if minted.is_empty() {
            return Ok(0);
        }
        txn.store_staker(staker, info);
        let changes = txn.finish();

        self.collaborators.fee_ledger.ping(
            staker,
            minted.first_period,
            minted.second_period,
            None,
        )?;
        self.apply(changes);
        Ok(minted.reward)
    }
}

/// Realize the reward of pending commitments before `current`, oldest first.
///
/// A sub-stake earns for a period when it was active in it, measured against
/// the network total locked for that period. With re-stake on, the reward is
/// added to the sub-stake and to every later pending period it is active in.
pub(crate) fn mint_pending(
    txn: &mut Transaction<'_>,
    staker: AccountId,
    info: &mut StakerInfo,
    current: Period,
) -> Result<MintOutcome> {
    let previous = current.saturating_sub(1);
    let due: Vec<Period> = info
        .committed
        .pending()
        .into_iter()
        .filter(|&p| p <= previous)
        .collect();
    if due.is_empty() {
        return Ok(MintOutcome::default());
    }

    let start = info.start_period(current);
    let re_stake = info.flags.re_stake;
    let mut reward: TokenAmount = 0;

    for &period in &due {
        let total_locked = txn.locked_per_period(period);
        let later: Vec<Period> = info
            .committed
            .pending()
            .into_iter()
            .filter(|&p| p > period)
            .collect();

        for index in 0..info.sub_stakes.len() {
            let sub = *info.sub_stakes.get(index)?;
            if !sub.is_active(period, start) {
                continue;
            }
            let locked_periods = sub.reward_last_period_from(start).saturating_sub(period);
            let sub_reward =
                txn.issuer
                    .mint(current, sub.locked_value, total_locked, locked_periods)?;
            reward = math::add(reward, sub_reward, "minted reward")?;

            if re_stake && sub_reward > 0 {
                let slot = info.sub_stakes.get_mut(index)?;
                slot.locked_value = math::add(slot.locked_value, sub_reward, "sub-stake value")?;
                for &later_period in &later {
                    if sub.is_active(later_period, start) {
                        txn.add_locked(later_period, sub_reward)?;
                    }
                }
            }
        }
        info.committed.clear(period);
        info.last_committed_period = Some(period);
    }

    info.value = math::add(info.value, reward, "staker value")?;
    if info.flags.measure_work {
        info.completed_work = math::add(info.completed_work, reward, "completed work")?;
    }
    txn.emit(EscrowEvent::Minted {
        staker,
        period: previous,
        value: reward,
    });

    Ok(MintOutcome {
        first_period: due.first().copied(),
        second_period: due.get(1).copied(),
        reward,
    })
}

#[cfg(test)]
mod tests {
    use crate::collaborators::FeeLedgerCall;
    use crate::events::EscrowEvent;
    use crate::staking::tests::Fixture;
    use crate::substake::Downtime;
    use escrow_core::{AccountId, CallContext, EscrowError};

    fn staked(fx: &mut Fixture, label: &str, value: u128, periods: u32) -> AccountId {
        let staker = fx.account(label, value);
        fx.escrow.deposit(staker, staker, value, periods).unwrap();
        fx.escrow.bond_worker(staker, Some(staker)).unwrap();
        staker
    }

    #[test]
    fn test_commit_locks_next_period() {
        let mut fx = Fixture::at(5);
        let alice = staked(&mut fx, "alice", 1_000, 10);
        fx.escrow.commit(CallContext::direct(alice)).unwrap();

        assert_eq!(fx.escrow.locked_per_period(6), 1_000);
        let info = fx.escrow.staker_info(alice).unwrap();
        assert_eq!(info.committed.next(), Some(6));
        // first commitment: no downtime to record
        assert!(info.past_downtime.is_empty());
        assert_eq!(
            fx.fee_ledger.calls().last(),
            Some(&FeeLedgerCall::Ping {
                staker: alice,
                processed_period_1: None,
                processed_period_2: None,
                default_period: Some(6),
            })
        );
    }

    #[test]
    fn test_commit_twice_is_rejected_without_changes() {
        let mut fx = Fixture::at(5);
        let alice = staked(&mut fx, "alice", 1_000, 10);
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        let before = fx.escrow.staker_info(alice).cloned();

        assert!(matches!(
            fx.escrow.commit(CallContext::direct(alice)),
            Err(EscrowError::AlreadyCommitted(6))
        ));
        assert_eq!(fx.escrow.locked_per_period(6), 1_000);
        assert_eq!(fx.escrow.staker_info(alice).cloned(), before);
    }

    #[test]
    fn test_commit_caller_checks() {
        let mut fx = Fixture::at(5);
        let alice = staked(&mut fx, "alice", 1_000, 10);
        let relay = AccountId::from_label("relay");
        assert!(matches!(
            fx.escrow.commit(CallContext::relayed(relay, alice)),
            Err(EscrowError::RelayedCall(_))
        ));
        assert!(matches!(
            fx.escrow.commit(CallContext::direct(relay)),
            Err(EscrowError::UnknownWorker(_))
        ));
    }

    #[test]
    fn test_reward_realized_one_period_later() {
        let mut fx = Fixture::at(5);
        let alice = staked(&mut fx, "alice", 1_000, 10);
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        fx.advance(1);
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        // period 6 is still running
        assert_eq!(fx.escrow.all_tokens(alice), 1_000);

        fx.advance(1);
        fx.escrow.drain_events();
        fx.escrow.commit(CallContext::direct(alice)).unwrap();

        // sole locker: pool 1_000_000 * (1 + 3) / (2 * 4)
        let reward = 500_000;
        assert_eq!(fx.escrow.all_tokens(alice), 1_000 + reward);
        assert!(fx.escrow.events().contains(&EscrowEvent::Minted {
            staker: alice,
            period: 6,
            value: reward,
        }));
        // re-staked reward also counts for the commitments still pending
        assert_eq!(fx.escrow.locked_per_period(7), 1_000 + reward);
        assert_eq!(fx.escrow.locked_per_period(8), 1_000 + reward);
        assert_eq!(fx.escrow.reserved_reward(), 1_000_000 - reward);
        fx.escrow.check_invariants().unwrap();
    }

    #[test]
    fn test_reward_without_re_stake_stays_unlocked() {
        let mut fx = Fixture::at(5);
        let alice = staked(&mut fx, "alice", 1_000, 10);
        fx.escrow.set_re_stake(alice, false).unwrap();
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        fx.advance(2);

        let reward = fx.escrow.mint(alice).unwrap();
        assert_eq!(reward, 500_000);
        assert_eq!(fx.escrow.sub_stake(alice, 0).unwrap().locked_value, 1_000);
        assert_eq!(fx.escrow.all_tokens(alice), 501_000);
        assert_eq!(fx.escrow.last_committed_period(alice), Some(6));

        // nothing left to mint
        assert_eq!(fx.escrow.mint(alice).unwrap(), 0);
        fx.escrow.withdraw(alice, reward).unwrap();
    }

    #[test]
    fn test_missed_periods_become_downtime() {
        let mut fx = Fixture::at(5);
        let alice = staked(&mut fx, "alice", 1_000, 10);
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        fx.advance(4);
        // period 9: committed 6, missed 7 and 8
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        assert_eq!(
            fx.escrow.past_downtime(alice),
            vec![Downtime {
                start_period: 7,
                end_period: 9
            }]
        );
    }

    #[test]
    fn test_wind_down_shortens_open_sub_stakes() {
        let mut fx = Fixture::at(5);
        let alice = staked(&mut fx, "alice", 1_000, 2);
        fx.escrow.set_wind_down(alice, true).unwrap();

        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        assert_eq!(fx.escrow.sub_stake(alice, 0).unwrap().unlocking_duration, 1);
        fx.advance(1);
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        let sub = fx.escrow.sub_stake(alice, 0).unwrap();
        assert_eq!(sub.unlocking_duration, 0);
        assert_eq!(sub.last_period, Some(7));

        // the lock ran out
        fx.advance(1);
        assert!(matches!(
            fx.escrow.commit(CallContext::direct(alice)),
            Err(EscrowError::NothingLocked)
        ));
    }

    #[test]
    fn test_work_measurement_accumulates_reward() {
        let mut fx = Fixture::at(5);
        let alice = staked(&mut fx, "alice", 1_000, 10);
        fx.escrow.set_work_measurement(fx.work_lock, alice, true).unwrap();
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        fx.advance(2);
        fx.escrow.commit(CallContext::direct(alice)).unwrap();
        assert_eq!(fx.escrow.completed_work(alice), 500_000);
    }
}
