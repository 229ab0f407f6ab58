//! Invitation pacing
//!
//! Keeps the per-action cadence inside a plausible human-operation envelope:
//! a randomized delay after every item, plus a longer pause every tenth item.

use std::time::Duration;

use rand::Rng;

/// Extra seconds added on top of every per-item delay
const ITEM_DELAY_SLACK: (f64, f64) = (0.0, 2.0);

/// Extended pause range in seconds
const EXTENDED_PAUSE: (f64, f64) = (10.0, 20.0);

/// Number of processed items between extended pauses
const EXTENDED_PAUSE_EVERY: u64 = 10;

/// Delay generator for one job's configured bounds
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    delay_min: u64,
    delay_max: u64,
}

impl Pacer {
    /// Create a pacer for the given per-item delay bounds in seconds.
    ///
    /// Bounds are normalized so `min <= max` always holds.
    pub fn new(delay_min: u64, delay_max: u64) -> Self {
        Self {
            delay_min: delay_min.min(delay_max),
            delay_max: delay_max.max(delay_min),
        }
    }

    /// Randomized delay slept after each processed item
    pub fn item_delay(&self) -> Duration {
        let mut rng = rand::rng();
        let base = rng.random_range(self.delay_min as f64..=self.delay_max as f64);
        let slack = rng.random_range(ITEM_DELAY_SLACK.0..=ITEM_DELAY_SLACK.1);
        Duration::from_secs_f64(base + slack)
    }

    /// Longer pause inserted every tenth processed item
    pub fn extended_pause(&self) -> Duration {
        let mut rng = rand::rng();
        Duration::from_secs_f64(rng.random_range(EXTENDED_PAUSE.0..=EXTENDED_PAUSE.1))
    }

    /// Whether the extended pause is due after this many processed items
    /// (1-indexed)
    pub fn is_pause_point(&self, processed: u64) -> bool {
        processed > 0 && processed % EXTENDED_PAUSE_EVERY == 0
    }
}
