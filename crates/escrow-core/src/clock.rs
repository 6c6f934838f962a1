//! Period clock
//!
//! Converts wall-clock time into discrete periods. The time source is pluggable
//! so a ledger can run against the system clock or a manually driven clock.

use crate::types::Period;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Source of wall-clock time in Unix seconds
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> u64;
}

/// System time source
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}

/// Manually driven time source for simulation and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(now_secs: u64) -> Self {
        Self {
            now: AtomicU64::new(now_secs),
        }
    }

    /// Set the current time
    pub fn set(&self, now_secs: u64) {
        self.now.store(now_secs, Ordering::SeqCst);
    }

    /// Move the clock forward
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Rescale a period index from one period length to another.
///
/// A non-zero input never rescales to 0: 0 means "never set" throughout the
/// ledger, so a value that existed keeps existing as period 1.
pub fn recalculate_period(
    old_period: Period,
    old_seconds_per_period: u32,
    new_seconds_per_period: u32,
) -> Period {
    if new_seconds_per_period == 0 {
        return old_period;
    }
    let rescaled =
        u64::from(old_period) * u64::from(old_seconds_per_period) / u64::from(new_seconds_per_period);
    let rescaled = Period::try_from(rescaled).unwrap_or(Period::MAX);
    if rescaled == 0 && old_period != 0 {
        1
    } else {
        rescaled
    }
}

/// Period clock bound to a time source
#[derive(Clone)]
pub struct PeriodClock {
    source: Arc<dyn Clock>,
    seconds_per_period: u32,
    genesis_seconds_per_period: u32,
}

impl PeriodClock {
    /// Create a period clock.
    ///
    /// `genesis_seconds_per_period` is the period length records were written
    /// with before the last period-length change; equal to `seconds_per_period`
    /// when no change ever happened.
    pub fn new(
        source: Arc<dyn Clock>,
        seconds_per_period: u32,
        genesis_seconds_per_period: u32,
    ) -> Self {
        Self {
            source,
            seconds_per_period: seconds_per_period.max(1),
            genesis_seconds_per_period: genesis_seconds_per_period.max(1),
        }
    }

    pub fn seconds_per_period(&self) -> u32 {
        self.seconds_per_period
    }

    pub fn genesis_seconds_per_period(&self) -> u32 {
        self.genesis_seconds_per_period
    }

    pub fn now_secs(&self) -> u64 {
        self.source.now_secs()
    }

    /// Current period on the active scale
    pub fn current_period(&self) -> Period {
        let period = self.source.now_secs() / u64::from(self.seconds_per_period);
        Period::try_from(period).unwrap_or(Period::MAX)
    }

    /// Current period on the genesis scale
    pub fn genesis_current_period(&self) -> Period {
        let period = self.source.now_secs() / u64::from(self.genesis_seconds_per_period);
        Period::try_from(period).unwrap_or(Period::MAX)
    }

    /// Rescale a genesis-scale period onto the active scale
    pub fn recalculate_period(&self, genesis_period: Period) -> Period {
        recalculate_period(
            genesis_period,
            self.genesis_seconds_per_period,
            self.seconds_per_period,
        )
    }

    /// First second of a period on the active scale
    pub fn period_start_secs(&self, period: Period) -> u64 {
        u64::from(period) * u64::from(self.seconds_per_period)
    }
}

impl fmt::Debug for PeriodClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodClock")
            .field("now", &self.source.now_secs())
            .field("seconds_per_period", &self.seconds_per_period)
            .field("genesis_seconds_per_period", &self.genesis_seconds_per_period)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u32 = 24 * 3600;
    const WEEK: u32 = 7 * DAY;

    #[test]
    fn test_current_period() {
        let source = Arc::new(ManualClock::new(0));
        let clock = PeriodClock::new(source.clone(), DAY, DAY);
        assert_eq!(clock.current_period(), 0);

        source.set(u64::from(DAY) * 5 + 10);
        assert_eq!(clock.current_period(), 5);

        source.advance(u64::from(DAY));
        assert_eq!(clock.current_period(), 6);
        assert_eq!(clock.period_start_secs(6), u64::from(DAY) * 6);
    }

    #[test]
    fn test_recalculate_period() {
        assert_eq!(recalculate_period(14, DAY, WEEK), 2);
        assert_eq!(recalculate_period(20, DAY, WEEK), 2);
        assert_eq!(recalculate_period(0, DAY, WEEK), 0);
        // collapses to 0 but had a value
        assert_eq!(recalculate_period(3, DAY, WEEK), 1);
    }

    #[test]
    fn test_genesis_scale() {
        let source = Arc::new(ManualClock::new(u64::from(DAY) * 21));
        let clock = PeriodClock::new(source, WEEK, DAY);
        assert_eq!(clock.genesis_current_period(), 21);
        assert_eq!(clock.current_period(), 3);
        assert_eq!(clock.recalculate_period(21), 3);
    }
}
