use serde::{Deserialize, Serialize};
use std::{hint, thread, time::Duration};

/// Wait policy for polling loops.
///
/// `snooze` goes through three phases: `spin_limit` rounds of busy spinning
/// (each round twice as long as the last, capped at 64 spins), `yield_limit`
/// rounds of yielding the thread, and then sleeping, starting at
/// `min_sleep_us` and doubling up to `max_sleep_us`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    #[serde(default = "default_spin_limit")]
    pub spin_limit: u32,
    #[serde(default = "default_yield_limit")]
    pub yield_limit: u32,
    #[serde(default = "default_min_sleep")]
    pub min_sleep_us: u64,
    #[serde(default = "default_max_sleep")]
    pub max_sleep_us: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            spin_limit: default_spin_limit(),
            yield_limit: default_yield_limit(),
            min_sleep_us: default_min_sleep(),
            max_sleep_us: default_max_sleep(),
        }
    }
}

fn default_spin_limit() -> u32 {
    64
}

fn default_yield_limit() -> u32 {
    16
}

fn default_min_sleep() -> u64 {
    1
}

fn default_max_sleep() -> u64 {
    1000
}

const MAX_SPIN_SHIFT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Spin(u32),
    Yield,
    Sleep(Duration),
}

#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    step: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, step: 0 }
    }

    /// the phase the next `snooze` call will use
    pub fn phase(&self) -> Phase {
        let step = self.step;

        if step < self.config.spin_limit {
            Phase::Spin(1 << step.min(MAX_SPIN_SHIFT))
        } else if step - self.config.spin_limit < self.config.yield_limit {
            Phase::Yield
        } else {
            let doublings = step - self.config.spin_limit - self.config.yield_limit;
            let micros = self
                .config
                .min_sleep_us
                .max(1)
                .saturating_mul(1u64.checked_shl(doublings).unwrap_or(u64::MAX))
                .min(self.config.max_sleep_us.max(1));

            Phase::Sleep(Duration::from_micros(micros))
        }
    }

    pub fn snooze(&mut self) {
        match self.phase() {
            Phase::Spin(spins) => (0..spins).for_each(|_| hint::spin_loop()),
            Phase::Yield => thread::yield_now(),
            Phase::Sleep(duration) => thread::sleep(duration),
        }

        self.step = self.step.saturating_add(1);
    }

    /// start over with spinning, called whenever the awaited event happened
    pub fn reset(&mut self) {
        self.step = 0;
    }
}
