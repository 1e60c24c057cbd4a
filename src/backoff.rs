//! Backoff strategies for reconnection pacing.
//!
//! Provides constant, linear, and exponential strategies. Unlike a stateless `delay(attempt)`
//! function, a reconnect backoff is a cursor over a series: `next()` advances one retry step and
//! returns the delay for it, `current()` reports the last delay handed out without advancing, and
//! `reset()` rewinds to the start once a connection succeeds.
//!
//! Step semantics: the n-th call to `next()` on a fresh (or reset) instance returns the delay of
//! step `i = n - 1`, so the first retry waits for the initial delay.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use resocket::{Backoff, BackoffStrategy};
//!
//! let mut backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max_exponent(3)
//!     .unwrap();
//! assert_eq!(backoff.next(), Duration::from_millis(100));
//! assert_eq!(backoff.next(), Duration::from_millis(200));
//! assert_eq!(backoff.next(), Duration::from_millis(400));
//! assert_eq!(backoff.next(), Duration::from_millis(400)); // plateau
//! assert_eq!(backoff.retries(), 4);
//!
//! backoff.reset();
//! assert_eq!(backoff.retries(), 0);
//! assert_eq!(backoff.next(), Duration::from_millis(100));
//! ```
//!
//! Overflow behavior: computations that would overflow saturate to `MAX_BACKOFF` (1 day).

use std::fmt;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    /// A bound was applied to a strategy that has no such parameter.
    #[error("{bound} is not supported by {strategy} backoff")]
    UnsupportedBound { bound: &'static str, strategy: &'static str },
    /// Linear cap below the initial delay.
    #[error("max ({max:?}) must be >= initial ({initial:?})")]
    MaxLessThanInitial { initial: Duration, max: Duration },
}

/// Trait implemented by all backoff strategies.
///
/// Implementations are exclusively owned by one connection handle and are not shared.
pub trait BackoffStrategy: Send + fmt::Debug {
    /// Number of `next()` calls since construction or the last `reset()`.
    fn retries(&self) -> u32;

    /// Delay most recently returned by `next()`, or the initial delay when none was.
    fn current(&self) -> Duration;

    /// Advance one retry step and return its delay.
    fn next(&mut self) -> Duration;

    /// Rewind to the first step. Configured parameters are untouched.
    fn reset(&mut self);
}

fn step(retries: u32) -> u32 {
    retries.saturating_sub(1)
}

/// Always waits the same amount of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBackoff {
    delay: Duration,
    retries: u32,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay, retries: 0 }
    }
}

impl BackoffStrategy for ConstantBackoff {
    fn retries(&self) -> u32 {
        self.retries
    }

    fn current(&self) -> Duration {
        self.delay
    }

    fn next(&mut self) -> Duration {
        self.retries = self.retries.saturating_add(1);
        self.delay
    }

    fn reset(&mut self) {
        self.retries = 0;
    }
}

/// Grows by a fixed increment per step, optionally capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearBackoff {
    initial: Duration,
    increment: Duration,
    max: Option<Duration>,
    retries: u32,
}

impl LinearBackoff {
    pub fn new(
        initial: Duration,
        increment: Duration,
        max: Option<Duration>,
    ) -> Result<Self, BackoffError> {
        if let Some(max) = max {
            if max < initial {
                return Err(BackoffError::MaxLessThanInitial { initial, max });
            }
        }
        Ok(Self { initial, increment, max, retries: 0 })
    }

    fn delay_at(&self, i: u32) -> Duration {
        let grown = self
            .increment
            .checked_mul(i)
            .and_then(|inc| self.initial.checked_add(inc))
            .unwrap_or(MAX_BACKOFF);
        let capped = self.max.map(|m| grown.min(m)).unwrap_or(grown);
        capped.min(MAX_BACKOFF)
    }
}

impl BackoffStrategy for LinearBackoff {
    fn retries(&self) -> u32 {
        self.retries
    }

    fn current(&self) -> Duration {
        self.delay_at(step(self.retries))
    }

    fn next(&mut self) -> Duration {
        self.retries = self.retries.saturating_add(1);
        self.current()
    }

    fn reset(&mut self) {
        self.retries = 0;
    }
}

/// Doubles per step. With `max_exponent` the series yields that many distinct values and then
/// plateaus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max_exponent: Option<u32>,
    retries: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max_exponent: Option<u32>) -> Self {
        Self { base, max_exponent, retries: 0 }
    }

    fn delay_at(&self, i: u32) -> Duration {
        let exponent = match self.max_exponent {
            Some(max) => i.min(max.saturating_sub(1)),
            None => i,
        };
        let multiplier = 2u128.saturating_pow(exponent);
        let nanos = self.base.as_nanos().saturating_mul(multiplier);
        Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn retries(&self) -> u32 {
        self.retries
    }

    fn current(&self) -> Duration {
        self.delay_at(step(self.retries))
    }

    fn next(&mut self) -> Duration {
        self.retries = self.retries.saturating_add(1);
        self.current()
    }

    fn reset(&mut self) {
        self.retries = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BackoffKind {
    Constant(ConstantBackoff),
    Linear(LinearBackoff),
    Exponential(ExponentialBackoff),
}

impl BackoffKind {
    fn name(&self) -> &'static str {
        match self {
            BackoffKind::Constant(_) => "constant",
            BackoffKind::Linear(_) => "linear",
            BackoffKind::Exponential(_) => "exponential",
        }
    }

    fn as_strategy(&self) -> &dyn BackoffStrategy {
        match self {
            BackoffKind::Constant(c) => c,
            BackoffKind::Linear(l) => l,
            BackoffKind::Exponential(e) => e,
        }
    }

    fn as_strategy_mut(&mut self) -> &mut dyn BackoffStrategy {
        match self {
            BackoffKind::Constant(c) => c,
            BackoffKind::Linear(l) => l,
            BackoffKind::Exponential(e) => e,
        }
    }
}

/// Closed set of backoff strategies stored by the connection engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    kind: BackoffKind,
}

impl Backoff {
    /// Create a constant backoff strategy
    pub fn constant(delay: Duration) -> Self {
        Self { kind: BackoffKind::Constant(ConstantBackoff::new(delay)) }
    }

    /// Create an uncapped linear backoff strategy
    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self {
            kind: BackoffKind::Linear(LinearBackoff {
                initial,
                increment,
                max: None,
                retries: 0,
            }),
        }
    }

    /// Create an unbounded exponential backoff strategy
    pub fn exponential(base: Duration) -> Self {
        Self { kind: BackoffKind::Exponential(ExponentialBackoff::new(base, None)) }
    }

    /// Cap a linear backoff. Errors on other strategies or when `max < initial`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        let strategy = self.kind.name();
        match &mut self.kind {
            BackoffKind::Linear(linear) => {
                if max < linear.initial {
                    return Err(BackoffError::MaxLessThanInitial { initial: linear.initial, max });
                }
                linear.max = Some(max);
                Ok(self)
            }
            _ => Err(BackoffError::UnsupportedBound { bound: "max", strategy }),
        }
    }

    /// Bound the exponent of an exponential backoff. Errors on other strategies.
    pub fn with_max_exponent(mut self, max_exponent: u32) -> Result<Self, BackoffError> {
        let strategy = self.kind.name();
        match &mut self.kind {
            BackoffKind::Exponential(exp) => {
                exp.max_exponent = Some(max_exponent);
                Ok(self)
            }
            _ => Err(BackoffError::UnsupportedBound { bound: "max_exponent", strategy }),
        }
    }
}

impl BackoffStrategy for Backoff {
    fn retries(&self) -> u32 {
        self.kind.as_strategy().retries()
    }

    fn current(&self) -> Duration {
        self.kind.as_strategy().current()
    }

    fn next(&mut self) -> Duration {
        self.kind.as_strategy_mut().next()
    }

    fn reset(&mut self) {
        self.kind.as_strategy_mut().reset()
    }
}

impl From<ConstantBackoff> for Backoff {
    fn from(value: ConstantBackoff) -> Self {
        Self { kind: BackoffKind::Constant(value) }
    }
}

impl From<LinearBackoff> for Backoff {
    fn from(value: LinearBackoff) -> Self {
        Self { kind: BackoffKind::Linear(value) }
    }
}

impl From<ExponentialBackoff> for Backoff {
    fn from(value: ExponentialBackoff) -> Self {
        Self { kind: BackoffKind::Exponential(value) }
    }
}
