use std::time::Duration;

use rand::Rng;

/// Doubling delay with up to 25% random jitter, so two idle searchers do
/// not keep re-querying in lockstep.
#[derive(Debug, Clone)]
pub struct SearchBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl SearchBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let jitter_cap = (base.as_millis() / 4) as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        base + Duration::from_millis(jitter)
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
