//! Exponential backoff with jitter and a ceiling
//!
//! Nominal delays run `initial, 2·initial, 4·initial, …` up to `max_delay`
//! and then stay there. With jitter enabled each delay is drawn uniformly
//! from `[0, nominal]`.

use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};

use crate::config::BackoffConfig;

/// Stateful delay generator for one retry sequence
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    schedule: ExponentialBackoff,
    attempts: u32,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            config: config.clone(),
            schedule: schedule(config),
            attempts: 0,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        self.attempts += 1;
        let nominal = self.next_nominal();
        if self.config.jitter {
            jitter(nominal)
        } else {
            nominal
        }
    }

    /// Next delay without jitter
    fn next_nominal(&mut self) -> Duration {
        self.schedule.next().unwrap_or_else(|| self.max_delay())
    }

    /// Start over from the initial delay
    pub fn reset(&mut self) {
        self.schedule = schedule(&self.config);
        self.attempts = 0;
    }

    /// Delays handed out since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn max_delay(&self) -> Duration {
        Duration::from_millis(self.config.max_delay_ms)
    }
}

/// Base-2 exponential sequence scaled so the first delay is `initial_delay_ms`
fn schedule(config: &BackoffConfig) -> ExponentialBackoff {
    let initial = config.initial_delay_ms.max(1);
    ExponentialBackoff::from_millis(2)
        .factor((initial / 2).max(1))
        .max_delay(Duration::from_millis(config.max_delay_ms.max(initial)))
}

/// Nominal (unjittered) delays of a configuration, for inspection
pub fn nominal_delays(config: &BackoffConfig) -> impl Iterator<Item = Duration> {
    let max = Duration::from_millis(config.max_delay_ms.max(config.initial_delay_ms.max(1)));
    schedule(config).map(move |d| d.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn millis(delays: impl Iterator<Item = Duration>) -> Vec<u64> {
        delays.map(|d| d.as_millis() as u64).collect()
    }

    #[test]
    fn test_schedule_doubles_and_caps() {
        let config = BackoffConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            jitter: false,
        };
        assert_eq!(
            millis(nominal_delays(&config).take(7)),
            vec![1000, 2000, 4000, 8000, 10_000, 10_000, 10_000]
        );
    }

    #[test]
    fn test_schedule_never_exceeds_cap() {
        let config = BackoffConfig::default();
        let max = Duration::from_millis(config.max_delay_ms);
        assert!(nominal_delays(&config).take(200).all(|d| d <= max));
    }

    #[test]
    fn test_jittered_delays_stay_below_nominal() {
        let config = BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 800,
            jitter: true,
        };
        let nominal: Vec<Duration> = nominal_delays(&config).take(10).collect();
        let mut backoff = Backoff::new(&config);
        for expected in nominal {
            assert!(backoff.next_delay() <= expected);
        }
        assert_eq!(backoff.attempts(), 10);
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let config = BackoffConfig {
            initial_delay_ms: 500,
            max_delay_ms: 60_000,
            jitter: false,
        };
        let mut backoff = Backoff::new(&config);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
