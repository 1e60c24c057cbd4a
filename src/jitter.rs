//! Randomised reconnect delays
//!
//! Applied to each delay the backoff hands out, just before the retry timer is armed. The
//! backoff's own sequence is untouched, and the delay reported in `RetryEvent` is the jittered
//! one.

use rand::{rng, Rng};
use std::sync::Mutex;
use std::time::Duration;

/// Errors produced when configuring jitter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitterError {
    #[error("decorrelated jitter: base ({base:?}) must not exceed max ({max:?})")]
    BaseExceedsMax { base: Duration, max: Duration },
}

/// Decorrelated jitter bounds plus the previous reconnect delay.
#[derive(Debug)]
pub struct DecorrelatedConfig {
    base: Duration,
    max: Duration,
    previous: Mutex<Duration>,
}

impl DecorrelatedConfig {
    fn previous(&self) -> Duration {
        *self.previous.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Clone for DecorrelatedConfig {
    fn clone(&self) -> Self {
        Self { base: self.base, max: self.max, previous: Mutex::new(self.previous()) }
    }
}

#[derive(Debug, Clone, Default)]
pub enum Jitter {
    /// Reconnect after exactly the backoff delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
    /// `min(max, random(base, previous * 3))`, ignoring the backoff delay. Rewound to `base`
    /// when the socket reconnects.
    Decorrelated(DecorrelatedConfig),
}

impl Jitter {
    pub fn full() -> Self {
        Jitter::Full
    }

    pub fn equal() -> Self {
        Jitter::Equal
    }

    pub fn decorrelated(base: Duration, max: Duration) -> Result<Self, JitterError> {
        if base > max {
            return Err(JitterError::BaseExceedsMax { base, max });
        }
        Ok(Jitter::Decorrelated(DecorrelatedConfig { base, max, previous: Mutex::new(base) }))
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rng();
        self.apply_with_rng(delay, &mut rng)
    }

    /// [`apply`](Self::apply) with a caller-provided RNG, for reproducible delays.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => {
                let millis = as_millis_saturated(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(0..=millis))
            }
            Jitter::Equal => {
                let millis = as_millis_saturated(delay);
                if millis == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rng.random_range(millis / 2..=millis))
            }
            Jitter::Decorrelated(config) => {
                let base = as_millis_saturated(config.base);
                let max = as_millis_saturated(config.max);
                let mut prev = config.previous.lock().unwrap_or_else(|e| e.into_inner());
                let upper = as_millis_saturated(*prev).saturating_mul(3).min(max);
                let lower = base.min(upper);
                *prev = Duration::from_millis(rng.random_range(lower..=upper));
                *prev
            }
        }
    }

    /// Called on reconnect.
    pub fn reset(&self) {
        if let Jitter::Decorrelated(config) = self {
            *config.previous.lock().unwrap_or_else(|e| e.into_inner()) = config.base;
        }
    }
}

fn as_millis_saturated(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}
