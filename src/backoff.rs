//
// Copyright (c) Dell Inc., or its subsidiaries. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//

use crate::config::{ConfigError, RetryConfig};
use num::checked_pow;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Randomization applied on top of the capped exponential delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    /// Use the capped delay as is.
    None,
    /// Pick uniformly from `[0, delay)`.
    Full,
    /// Keep half of the delay and pick the other half uniformly.
    Equal,
}

impl Default for Jitter {
    fn default() -> Self {
        Jitter::None
    }
}

impl fmt::Display for Jitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Jitter::None => "none",
            Jitter::Full => "full",
            Jitter::Equal => "equal",
        };
        f.write_str(name)
    }
}

impl FromStr for Jitter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Jitter::None),
            "full" => Ok(Jitter::Full),
            "equal" => Ok(Jitter::Equal),
            _ => Err(ConfigError::UnknownJitter { value: s.to_owned() }),
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Computes the wait that follows the failure of `attempt` (1-indexed).
///
/// The raw delay is `min(base_delay * 2^(attempt - 1), max_delay)`, saturating to
/// `max_delay` on overflow, then jitter is applied. The result is always floored to
/// whole milliseconds and never exceeds `max_delay`.
pub fn compute_delay<R>(
    base_delay: Duration,
    max_delay: Duration,
    jitter: Jitter,
    attempt: u32,
    rng: &mut R,
) -> Duration
where
    R: Rng + ?Sized,
{
    let cap = as_millis(max_delay);
    let exponent = attempt.saturating_sub(1) as usize;
    let raw = checked_pow(2u64, exponent)
        .and_then(|coefficient| as_millis(base_delay).checked_mul(coefficient))
        .map_or(cap, |delay| delay.min(cap));

    let millis = match jitter {
        Jitter::None => raw,
        Jitter::Full => (rng.gen::<f64>() * raw as f64).floor() as u64,
        Jitter::Equal => {
            let half = raw as f64 / 2.0;
            (half + rng.gen::<f64>() * half).floor() as u64
        }
    };
    Duration::from_millis(millis.min(raw))
}

/// The backoff schedule of one retry session.
///
/// Yields the delay after the first failed attempt, then the second, and so on.
/// The schedule never ends; the number of attempts is bounded by the session.
#[derive(Debug, Clone)]
pub struct Backoff<R = StdRng> {
    attempt: u32,

    base_delay: Duration,
    max_delay: Duration,
    jitter: Jitter,
    rng: R,
}

impl<R: Rng + SeedableRng> Backoff<R> {
    /// A schedule for `config`, seeded from `jitter_seed` when set and from the OS
    /// otherwise.
    pub fn from_config(config: &RetryConfig) -> Backoff<R> {
        let rng = match config.jitter_seed() {
            Some(seed) => R::seed_from_u64(seed),
            None => R::from_entropy(),
        };
        Backoff::with_rng(config, rng)
    }

    pub fn with_rng(config: &RetryConfig, rng: R) -> Backoff<R> {
        Backoff {
            attempt: 0,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter(),
            rng,
        }
    }

    /// The number of delays handed out so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl<R: Rng> Iterator for Backoff<R> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        Some(compute_delay(
            self.base_delay,
            self.max_delay,
            self.jitter,
            self.attempt,
            &mut self.rng,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfigBuilder;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn test_no_jitter_doubles_until_cap() {
        let mut rng = StdRng::seed_from_u64(1);
        let delays: Vec<Duration> = (1..=6)
            .map(|attempt| compute_delay(ms(100), ms(1000), Jitter::None, attempt, &mut rng))
            .collect();
        assert_eq!(delays, vec![ms(100), ms(200), ms(400), ms(800), ms(1000), ms(1000)]);
    }

    #[test]
    fn test_returns_cap_when_cap_less_than_base() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(compute_delay(ms(20), ms(10), Jitter::None, 1, &mut rng), ms(10));
        assert_eq!(compute_delay(ms(20), ms(10), Jitter::None, 2, &mut rng), ms(10));
    }

    #[test]
    fn test_overflow_saturates_to_cap() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(compute_delay(ms(500), ms(7000), Jitter::None, 200, &mut rng), ms(7000));
        assert_eq!(
            compute_delay(ms(u64::MAX), ms(7000), Jitter::None, 2, &mut rng),
            ms(7000)
        );
    }

    #[test]
    fn test_attempt_zero_is_treated_as_first() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(compute_delay(ms(100), ms(1000), Jitter::None, 0, &mut rng), ms(100));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..=10 {
            let raw = (100u64 << (attempt - 1)).min(3000);
            for _ in 0..200 {
                let full = compute_delay(ms(100), ms(3000), Jitter::Full, attempt, &mut rng);
                assert!(full < ms(raw) || raw == 0);

                let equal = compute_delay(ms(100), ms(3000), Jitter::Equal, attempt, &mut rng);
                assert!(equal >= ms(raw / 2));
                assert!(equal <= ms(raw));
            }
        }
    }

    #[test]
    fn test_zero_base_delay() {
        let mut rng = StdRng::seed_from_u64(7);
        for jitter in &[Jitter::None, Jitter::Full, Jitter::Equal] {
            assert_eq!(compute_delay(ms(0), ms(1000), *jitter, 3, &mut rng), ms(0));
        }
    }

    #[test]
    fn test_seeded_schedules_repeat() {
        let config = RetryConfigBuilder::default()
            .base_delay(ms(100))
            .max_delay(ms(10_000))
            .jitter(Jitter::Full)
            .jitter_seed(Some(99u64))
            .build()
            .unwrap();

        let first: Vec<Duration> = Backoff::<StdRng>::from_config(&config).take(8).collect();
        let second: Vec<Duration> = Backoff::<StdRng>::from_config(&config).take(8).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_schedule_follows_attempts() {
        let config = RetryConfigBuilder::default()
            .base_delay(ms(1))
            .max_delay(ms(12))
            .build()
            .unwrap();
        let mut s: Backoff = Backoff::from_config(&config);

        assert_eq!(s.next(), Some(ms(1)));
        assert_eq!(s.next(), Some(ms(2)));
        assert_eq!(s.next(), Some(ms(4)));
        assert_eq!(s.next(), Some(ms(8)));
        assert_eq!(s.next(), Some(ms(12)));
        assert_eq!(s.next(), Some(ms(12)));
        assert_eq!(s.attempt(), 6);
    }

    #[test]
    fn test_jitter_parsing() {
        assert_eq!("Full".parse::<Jitter>().unwrap(), Jitter::Full);
        assert_eq!(" equal ".parse::<Jitter>().unwrap(), Jitter::Equal);
        assert_eq!(Jitter::None.to_string(), "none");
        assert!(matches!(
            "half".parse::<Jitter>(),
            Err(ConfigError::UnknownJitter { .. })
        ));
    }
}
