use std::time::Duration;

/// Capped exponential delay generator.
///
/// `next()` hands out the current delay and doubles it for the following call,
/// never beyond `max_delay`. `reset()` goes back to `initial_delay`.
/// Also an endless `Iterator`, so it plugs straight into `tokio_retry`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    current_delay: Duration,
    initial_delay: Duration,
    max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(initial_delay);
        Self {
            current_delay: initial_delay,
            initial_delay,
            max_delay,
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Duration {
        let delay = self.current_delay;
        self.current_delay = self.current_delay.saturating_mul(2).min(self.max_delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
    }

    /// The delay the next call to `next()` will return
    pub fn peek(&self) -> Duration {
        self.current_delay
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Iterator for BackoffPolicy {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(Self::next(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_ceiling() {
        let mut backoff = BackoffPolicy::new(Duration::from_secs(5), Duration::from_secs(60));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60]);
    }

    #[test]
    fn test_monotonic_then_constant() {
        let mut backoff = BackoffPolicy::new(Duration::from_millis(3), Duration::from_millis(100));
        let mut previous = Duration::ZERO;
        for _ in 0..20 {
            let delay = backoff.next();
            assert!(delay >= previous);
            assert!(delay <= Duration::from_millis(100));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(100));
    }

    #[test]
    fn test_reset_restores_initial() {
        let mut backoff = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(8));
        backoff.next();
        backoff.next();
        assert_eq!(backoff.peek(), Duration::from_secs(4));
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_secs(1));
    }

    #[test]
    fn test_iterator_matches_next() {
        let delays: Vec<Duration> = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(3))
            .take(4)
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3)
            ]
        );
    }
}
