//! Randomised wake-up intervals for agent loops.

use rand::Rng;
use std::time::Duration;

/// Draw a delay uniformly from `[interval_min, interval_max]` seconds, at
/// millisecond resolution. Bounds given in the wrong order are swapped.
pub fn next_delay<R: Rng + ?Sized>(rng: &mut R, interval_min: u64, interval_max: u64) -> Duration {
    let (lo, hi) = if interval_min <= interval_max {
        (interval_min, interval_max)
    } else {
        (interval_max, interval_min)
    };
    let millis = rng.gen_range(lo.saturating_mul(1000)..=hi.saturating_mul(1000));
    Duration::from_millis(millis)
}
