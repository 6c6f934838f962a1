//! Property tests for the staking escrow ledger
//!
//! Random operation sequences must keep the ledger consistent: every open
//! period total matches what its committed stakers lock, past totals stay as
//! they were recorded, no staker locks more than it holds, and migration keeps
//! every locked token while migrating twice changes nothing.

mod common;

use common::{Network, SPP};
use escrow_core::{AccountId, CallContext, ManualClock, PeriodClock, TokenAmount};
use escrow_ledger::{
    migrate_staker, CommittedPeriods, StakerFlags, StakerInfo, SubStake, TokenCustody,
};
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;

const STAKERS: [&str; 3] = ["alice", "bob", "carol"];

#[derive(Clone, Debug)]
enum Op {
    Deposit { staker: usize, value: TokenAmount, periods: u32 },
    Commit { staker: usize },
    Advance { periods: u32 },
    Slash { staker: usize, penalty: TokenAmount },
    Withdraw { staker: usize, value: TokenAmount },
    Divide { staker: usize, index: usize, value: TokenAmount, periods: u32 },
    Merge { staker: usize, index_1: usize, index_2: usize },
    Prolong { staker: usize, index: usize, periods: u32 },
    WindDown { staker: usize, on: bool },
    ReStake { staker: usize, on: bool },
}

fn op() -> impl Strategy<Value = Op> {
    let staker = 0..STAKERS.len();
    prop_oneof![
        1 => (staker.clone(), 100u128..3_000, 2u32..8)
            .prop_map(|(staker, value, periods)| Op::Deposit { staker, value, periods }),
        4 => staker.clone().prop_map(|staker| Op::Commit { staker }),
        2 => (1u32..3).prop_map(|periods| Op::Advance { periods }),
        1 => (staker.clone(), 1u128..2_000).prop_map(|(staker, penalty)| Op::Slash { staker, penalty }),
        1 => (staker.clone(), 1u128..2_000).prop_map(|(staker, value)| Op::Withdraw { staker, value }),
        1 => (staker.clone(), 0usize..3, 100u128..1_000, 1u32..4).prop_map(
            |(staker, index, value, periods)| Op::Divide { staker, index, value, periods }
        ),
        1 => (staker.clone(), 0usize..3, 0usize..3).prop_map(|(staker, index_1, index_2)| {
            Op::Merge { staker, index_1, index_2 }
        }),
        1 => (staker.clone(), 0usize..3, 1u32..4)
            .prop_map(|(staker, index, periods)| Op::Prolong { staker, index, periods }),
        1 => (staker.clone(), any::<bool>()).prop_map(|(staker, on)| Op::WindDown { staker, on }),
        1 => (staker, any::<bool>()).prop_map(|(staker, on)| Op::ReStake { staker, on }),
    ]
}

/// Apply one operation; rejected operations are part of the exercise
fn apply(net: &mut Network, stakers: &[AccountId], op: &Op) {
    let investigator = AccountId::from_label("investigator");
    let _ = match *op {
        Op::Deposit { staker, value, periods } => {
            let id = stakers[staker];
            net.escrow.deposit(id, id, value, periods).and_then(|_| {
                if net.escrow.worker_of(id).is_none() {
                    net.escrow.bond_worker(id, Some(id))
                } else {
                    Ok(())
                }
            })
        }
        Op::Commit { staker } => net.escrow.commit(CallContext::direct(stakers[staker])),
        Op::Advance { periods } => {
            net.advance(periods);
            Ok(())
        }
        Op::Slash { staker, penalty } => net
            .escrow
            .slash(net.adjudicator, stakers[staker], penalty, investigator, penalty / 2)
            .map(|_| ()),
        Op::Withdraw { staker, value } => net.escrow.withdraw(stakers[staker], value),
        Op::Divide { staker, index, value, periods } => {
            net.escrow.divide_stake(stakers[staker], index, value, periods)
        }
        Op::Merge { staker, index_1, index_2 } => {
            net.escrow.merge_stake(stakers[staker], index_1, index_2)
        }
        Op::Prolong { staker, index, periods } => {
            net.escrow.prolong_stake(stakers[staker], index, periods)
        }
        Op::WindDown { staker, on } => net.escrow.set_wind_down(stakers[staker], on),
        Op::ReStake { staker, on } => net.escrow.set_re_stake(stakers[staker], on),
    };
}

fn funded_network() -> (Network, Vec<AccountId>) {
    let net = Network::at(5);
    let stakers: Vec<AccountId> = STAKERS
        .iter()
        .map(|label| {
            let id = AccountId::from_label(label);
            net.token.transfer(net.owner, id, 100_000).unwrap();
            id
        })
        .collect();
    (net, stakers)
}

fn sub_stake() -> impl Strategy<Value = SubStake> {
    (1u32..200, prop::option::of(1u32..400), 0u32..50, 100u128..10_000).prop_map(
        |(first, last, duration, value)| match last {
            Some(last) => SubStake::closed(first, first.max(last), value),
            None => SubStake::open(first, duration, value),
        },
    )
}

fn staker_record() -> impl Strategy<Value = StakerInfo> {
    (
        prop::collection::vec(sub_stake(), 0..5),
        prop::option::of(1u32..200),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(subs, committed, wind_down, migrated)| {
            let mut info = StakerInfo::fresh();
            for sub in subs {
                info.value += sub.locked_value;
                info.sub_stakes.save(sub, |_| false).unwrap();
            }
            let mut periods = CommittedPeriods::default();
            if let Some(period) = committed {
                periods.push(period).unwrap();
            }
            info.committed = periods;
            info.last_committed_period = committed;
            info.flags = StakerFlags {
                wind_down,
                migrated,
                ..StakerFlags::default()
            };
            info
        })
}

fn locked_sum(info: &StakerInfo) -> TokenAmount {
    info.sub_stakes.iter().map(|s| s.locked_value).sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ledger_stays_consistent(ops in prop::collection::vec(op(), 1..40)) {
        let (mut net, stakers) = funded_network();
        let mut past_totals = BTreeMap::new();
        for op in &ops {
            apply(&mut net, &stakers, op);
            prop_assert!(net.escrow.check_invariants().is_ok(), "after {:?}", op);
            net.assert_period_totals();
            net.assert_past_totals_kept(&mut past_totals);
        }
    }

    #[test]
    fn prop_slash_bounds(value in 100u128..5_000, penalty in 1u128..10_000, reward in 0u128..10_000) {
        let mut net = Network::at(5);
        let alice = net.staker("alice", value, 5);
        net.commit(alice);
        let reserve = net.escrow.reserved_reward();
        let investigator = AccountId::from_label("investigator");

        let applied = net.escrow.slash(net.adjudicator, alice, penalty, investigator, reward).unwrap();
        let paid = reward.min(applied);
        prop_assert_eq!(applied, penalty.min(value));
        prop_assert_eq!(net.escrow.all_tokens(alice), value - applied);
        prop_assert_eq!(net.escrow.reserved_reward(), reserve + applied - paid);
        prop_assert!(net.escrow.locked_tokens(alice, 1) <= net.escrow.all_tokens(alice));
        net.assert_period_totals();
    }

    #[test]
    fn prop_migration_is_idempotent(record in staker_record(), now in 0u64..1_000_000) {
        let clock = PeriodClock::new(Arc::new(ManualClock::new(now)), SPP / 4, SPP);
        let once = migrate_staker(&record, &clock);
        prop_assert!(once.flags.migrated);
        prop_assert_eq!(once.value, record.value);
        prop_assert_eq!(once.sub_stakes.len(), record.sub_stakes.len());
        prop_assert_eq!(locked_sum(&once), locked_sum(&record));
        prop_assert_eq!(migrate_staker(&once, &clock), once.clone());
        if record.flags.migrated {
            prop_assert_eq!(once, record);
        }
    }
}
