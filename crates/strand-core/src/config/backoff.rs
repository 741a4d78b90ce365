use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed(Duration),

    /// Exponential: initial * 2^retry (capped at max)
    Exponential { initial: Duration, max: Duration },

    /// Fibonacci: initial * fib(retry) (capped at max)
    Fibonacci { initial: Duration, max: Duration },

    /// Explicit escalating schedule; the last entry repeats
    Schedule(Vec<Duration>),
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(5),
        }
    }
}

impl BackoffStrategy {
    /// Delay before the given retry (0 = first retry)
    pub fn calculate(&self, retry: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential { initial, max } => {
                let multiplier = 2u32.saturating_pow(retry);
                initial.saturating_mul(multiplier).min(*max)
            }
            BackoffStrategy::Fibonacci { initial, max } => {
                let fib = Self::fibonacci(retry).min(u32::MAX as u64) as u32;
                initial.saturating_mul(fib).min(*max)
            }
            BackoffStrategy::Schedule(steps) => {
                let index = (retry as usize).min(steps.len().saturating_sub(1));
                steps.get(index).copied().unwrap_or(Duration::ZERO)
            }
        }
    }

    fn fibonacci(n: u32) -> u64 {
        let mut a = 1u64;
        let mut b = 1u64;
        for _ in 1..n {
            let c = a.saturating_add(b);
            a = b;
            b = c;
        }
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed() {
        let backoff = BackoffStrategy::Fixed(Duration::from_millis(50));
        assert_eq!(backoff.calculate(0), Duration::from_millis(50));
        assert_eq!(backoff.calculate(9), Duration::from_millis(50));
    }

    #[test]
    fn test_exponential_is_capped() {
        let backoff = BackoffStrategy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(backoff.calculate(0), Duration::from_millis(100));
        assert_eq!(backoff.calculate(1), Duration::from_millis(200));
        assert_eq!(backoff.calculate(3), Duration::from_millis(800));
        assert_eq!(backoff.calculate(4), Duration::from_secs(1));
        assert_eq!(backoff.calculate(60), Duration::from_secs(1));
    }

    #[test]
    fn test_fibonacci() {
        let backoff = BackoffStrategy::Fibonacci {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(10),
        };
        let delays: Vec<_> = (0..6).map(|i| backoff.calculate(i).as_millis()).collect();
        assert_eq!(delays, vec![10, 10, 20, 30, 50, 80]);
    }

    #[test]
    fn test_schedule_repeats_last_step() {
        let backoff = BackoffStrategy::Schedule(vec![
            Duration::from_millis(10),
            Duration::from_millis(100),
            Duration::from_secs(1),
        ]);
        assert_eq!(backoff.calculate(0), Duration::from_millis(10));
        assert_eq!(backoff.calculate(2), Duration::from_secs(1));
        assert_eq!(backoff.calculate(7), Duration::from_secs(1));
        assert_eq!(BackoffStrategy::Schedule(vec![]).calculate(3), Duration::ZERO);
    }
}
