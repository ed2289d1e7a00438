use std::{ops::RangeInclusive, time::Duration};

pub trait RetryError {
    fn should_retry(&self) -> bool;
}

pub trait RetryStrategy<E>: Send + Sync {
    fn retry(&self, completed_attempts: usize, last_error: &E) -> Option<Duration>;
}

/// Delay schedule for the push connection. There is no attempt limit: the
/// connection manager keeps trying for as long as the broker is alive.
#[derive(Clone, Debug, PartialEq)]
pub struct Retry {
    delay: RangeInclusive<Duration>,
    factor: f64,
}

/// Fixed five second delay between connection attempts.
pub const DEFAULT_RECONNECT: Retry = Retry::delay_millis(5000);

impl Retry {
    pub const fn delay(dur: Duration) -> Retry {
        Retry {
            delay: dur..=dur,
            factor: 1.0,
        }
    }

    pub const fn delay_millis(n: u64) -> Retry {
        Self::delay(Duration::from_millis(n))
    }

    pub const fn delay_jitter(dur: RangeInclusive<Duration>) -> Retry {
        Retry {
            delay: dur,
            factor: 1.0,
        }
    }

    pub const fn delay_jitter_millis(n: RangeInclusive<u64>) -> Retry {
        Self::delay_jitter(Duration::from_millis(*n.start())..=Duration::from_millis(*n.end()))
    }

    pub const fn with_backoff(self) -> Retry {
        Retry {
            delay: self.delay,
            factor: 1.5,
        }
    }

    pub fn base_delay(&self) -> Duration {
        *self.delay.start()
    }
}

impl Default for Retry {
    fn default() -> Self {
        DEFAULT_RECONNECT
    }
}

impl<E: RetryError> RetryStrategy<E> for Retry {
    fn retry(&self, completed_attempts: usize, last_error: &E) -> Option<Duration> {
        if !last_error.should_retry() {
            return None;
        }

        let f = self
            .factor
            .powi(completed_attempts as i32 - 1)
            .clamp(1.0, 50.0);
        let base = rand::random_range(self.delay.clone());
        if f == 1.0 {
            return Some(base);
        }
        Some(Duration::try_from_secs_f64(base.as_secs_f64() * f).unwrap_or(Duration::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky(bool);

    impl RetryError for Flaky {
        fn should_retry(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn fixed_delay_never_gives_up() {
        let r = Retry::default();
        for n in [1, 10, 10_000] {
            assert_eq!(r.retry(n, &Flaky(true)), Some(Duration::from_secs(5)));
        }
    }

    #[test]
    fn fatal_errors_stop_retrying() {
        assert_eq!(Retry::default().retry(1, &Flaky(false)), None);
    }

    #[test]
    fn jitter_stays_in_range_and_backoff_grows() {
        let r = Retry::delay_jitter_millis(100..=200);
        for _ in 0..50 {
            let d = r.retry(1, &Flaky(true)).unwrap();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }

        let r = Retry::delay_millis(100).with_backoff();
        let first = r.retry(1, &Flaky(true)).unwrap();
        let third = r.retry(3, &Flaky(true)).unwrap();
        assert!(first.abs_diff(Duration::from_millis(100)) < Duration::from_millis(1));
        assert!(third.abs_diff(Duration::from_millis(225)) < Duration::from_millis(1));
    }
}
