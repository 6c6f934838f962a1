//! Stake-weighted staker selection
//!
//! Stakers committed to the current period are laid out on a line in
//! registration order, each covering an interval as long as the tokens it
//! keeps locked through the requested horizon. A sample point selects the
//! staker whose interval contains it.

use crate::staking::StakingEscrow;
use escrow_core::{AccountId, EscrowError, Result, TokenAmount};
use rand::Rng;

impl StakingEscrow {
    /// Stakers active now and locked `periods` periods ahead.
    ///
    /// Returns the `(staker, locked)` pairs of the page starting at
    /// `start_index` and their total; a `limit` of 0 means no limit.
    pub fn active_stakers(
        &self,
        periods: u32,
        start_index: usize,
        limit: usize,
    ) -> Result<(TokenAmount, Vec<(AccountId, TokenAmount)>)> {
        if periods == 0 {
            return Err(EscrowError::ZeroValue);
        }
        let current = self.current_period();
        let target = current.saturating_add(periods);
        let end = if limit == 0 {
            self.stakers_length()
        } else {
            start_index.saturating_add(limit).min(self.stakers_length())
        };

        let mut total: TokenAmount = 0;
        let mut page = Vec::new();
        for staker in self.stakers().iter().take(end).skip(start_index) {
            let Some(info) = self.staker_info(*staker) else {
                continue;
            };
            if !info.flags.migrated || !info.committed.contains(current) {
                continue;
            }
            let locked = info.locked_tokens(current, target);
            if locked == 0 {
                continue;
            }
            total = total
                .checked_add(locked)
                .ok_or(EscrowError::Overflow("active stake"))?;
            page.push((*staker, locked));
        }
        Ok((total, page))
    }

    /// Select one staker per point on the cumulative stake line.
    ///
    /// Points must be ascending; points beyond the total select nothing.
    pub fn sample(&self, points: &[TokenAmount], periods: u32) -> Result<Vec<AccountId>> {
        if points.windows(2).any(|w| w[0] > w[1]) {
            return Err(EscrowError::UnsortedPoints);
        }
        let (_, active) = self.active_stakers(periods, 0, 0)?;

        let mut selected = Vec::with_capacity(points.len());
        let mut points = points.iter().copied().peekable();
        let mut upper: TokenAmount = 0;
        for (staker, locked) in active {
            upper = upper.saturating_add(locked);
            while points.next_if(|&p| p < upper).is_some() {
                selected.push(staker);
            }
            if points.peek().is_none() {
                break;
            }
        }
        Ok(selected)
    }

    /// Select `count` stakers with uniformly drawn points
    pub fn sample_random<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        count: usize,
        periods: u32,
    ) -> Result<Vec<AccountId>> {
        let (total, _) = self.active_stakers(periods, 0, 0)?;
        if total == 0 {
            return Ok(Vec::new());
        }
        let mut points: Vec<TokenAmount> = (0..count).map(|_| rng.gen_range(0..total)).collect();
        points.sort_unstable();
        self.sample(&points, periods)
    }
}

#[cfg(test)]
mod tests {
    use crate::staking::tests::Fixture;
    use escrow_core::{AccountId, CallContext, EscrowError};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Three stakers committed to period 6, Carol only locked for 3 periods
    fn network() -> (Fixture, [AccountId; 3]) {
        let mut fx = Fixture::at(5);
        let mut stakers = Vec::new();
        for (label, value, periods) in [("alice", 1_000, 10), ("bob", 3_000, 10), ("carol", 500, 3)] {
            let staker = fx.account(label, value);
            fx.escrow.deposit(staker, staker, value, periods).unwrap();
            fx.escrow.bond_worker(staker, Some(staker)).unwrap();
            fx.escrow.set_wind_down(staker, true).unwrap();
            fx.escrow.commit(CallContext::direct(staker)).unwrap();
            stakers.push(staker);
        }
        fx.advance(1);
        (fx, [stakers[0], stakers[1], stakers[2]])
    }

    #[test]
    fn test_active_stakers() {
        let (fx, [alice, bob, carol]) = network();
        let (total, page) = fx.escrow.active_stakers(1, 0, 0).unwrap();
        assert_eq!(total, 4_500);
        assert_eq!(page, vec![(alice, 1_000), (bob, 3_000), (carol, 500)]);

        // carol's lock ends before period 10
        let (total, _) = fx.escrow.active_stakers(4, 0, 0).unwrap();
        assert_eq!(total, 4_000);

        let (total, page) = fx.escrow.active_stakers(1, 1, 1).unwrap();
        assert_eq!(total, 3_000);
        assert_eq!(page, vec![(bob, 3_000)]);

        assert!(matches!(
            fx.escrow.active_stakers(0, 0, 0),
            Err(EscrowError::ZeroValue)
        ));
    }

    #[test]
    fn test_sample_by_points() {
        let (fx, [alice, bob, carol]) = network();
        let selected = fx.escrow.sample(&[0, 999, 1_000, 3_999, 4_000, 4_499], 1).unwrap();
        assert_eq!(selected, vec![alice, alice, bob, bob, carol, carol]);

        // past the end selects nothing
        assert_eq!(fx.escrow.sample(&[4_500], 1).unwrap(), vec![]);
        assert!(matches!(
            fx.escrow.sample(&[10, 5], 1),
            Err(EscrowError::UnsortedPoints)
        ));
    }

    #[test]
    fn test_sample_random_is_stake_weighted() {
        let (fx, [alice, bob, _]) = network();
        let mut rng = StdRng::seed_from_u64(7);
        let selected = fx.escrow.sample_random(&mut rng, 400, 4).unwrap();
        assert_eq!(selected.len(), 400);
        let bob_count = selected.iter().filter(|s| **s == bob).count();
        let alice_count = selected.iter().filter(|s| **s == alice).count();
        assert_eq!(bob_count + alice_count, 400);
        assert!(bob_count > alice_count);
    }

    #[test]
    fn test_uncommitted_stakers_are_skipped() {
        let (fx, _) = network();
        fx.advance(1);
        let (total, page) = fx.escrow.active_stakers(1, 0, 0).unwrap();
        assert_eq!(total, 0);
        assert!(page.is_empty());
        let mut rng = StdRng::seed_from_u64(1);
        assert!(fx.escrow.sample_random(&mut rng, 3, 1).unwrap().is_empty());
    }
}
