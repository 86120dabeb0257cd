use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Sliding-window call limiter shared by every REST call in the process.
///
/// `acquire` suspends until fewer than `max_calls` calls were recorded in the
/// trailing `period`, then records the current instant. Endpoints can be given
/// their own window; everything else shares the default one. Cloning shares
/// the underlying windows.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    default: Arc<Window>,
    endpoints: Vec<(String, Arc<Window>)>,
}

#[derive(Debug)]
struct Window {
    max_calls: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl Window {
    fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            period,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    fn evict(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while calls
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.period)
        {
            calls.pop_front();
        }
    }

    /// Holds the lock while sleeping so concurrent callers queue behind it
    async fn acquire(&self) -> Duration {
        let mut calls = self.calls.lock().await;
        let mut waited = Duration::ZERO;

        loop {
            let now = Instant::now();
            self.evict(&mut calls, now);

            if calls.len() < self.max_calls {
                calls.push_back(now);
                return waited;
            }

            let Some(oldest) = calls.front().copied() else {
                continue;
            };
            let wait = self.period.saturating_sub(now.duration_since(oldest));
            debug!(
                wait_ms = wait.as_millis() as u64,
                in_window = calls.len(),
                "Rate limit window full, waiting"
            );
            sleep(wait).await;
            waited += wait;
        }
    }

    async fn in_window(&self) -> usize {
        let mut calls = self.calls.lock().await;
        self.evict(&mut calls, Instant::now());
        calls.len()
    }
}

impl RateLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            default: Arc::new(Window::new(max_calls, period)),
            endpoints: Vec::new(),
        }
    }

    /// Give endpoints starting with `prefix` a window of their own
    pub fn with_endpoint_limit(
        mut self,
        prefix: impl Into<String>,
        max_calls: usize,
        period: Duration,
    ) -> Self {
        self.endpoints
            .push((prefix.into(), Arc::new(Window::new(max_calls, period))));
        self
    }

    /// Acquire a slot in the default window; returns how long the caller waited
    pub async fn acquire(&self) -> Duration {
        self.default.acquire().await
    }

    /// Acquire a slot in the window governing `endpoint`
    pub async fn acquire_for(&self, endpoint: &str) -> Duration {
        self.window_for(endpoint).acquire().await
    }

    /// Calls currently counted in the window governing `endpoint`
    pub async fn in_window(&self, endpoint: &str) -> usize {
        self.window_for(endpoint).in_window().await
    }

    fn window_for(&self, endpoint: &str) -> &Window {
        self.endpoints
            .iter()
            .filter(|(prefix, _)| endpoint.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(&self.default, |(_, window)| window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_third_call_blocks_for_the_period() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(limiter.acquire().await, Duration::ZERO);
        assert_eq!(limiter.acquire().await, Duration::ZERO);
        let waited = limiter.acquire().await;

        assert_eq!(waited, Duration::from_secs(60));
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_never_exceeds_max_calls() {
        let limiter = RateLimiter::new(3, Duration::from_secs(10));
        let mut stamps = Vec::new();

        for _ in 0..10 {
            limiter.acquire().await;
            stamps.push(Instant::now());
        }

        for (i, first) in stamps.iter().enumerate() {
            let in_period = stamps[i..]
                .iter()
                .filter(|t| t.duration_since(*first) < Duration::from_secs(10))
                .count();
            assert!(in_period <= 3, "window starting at call {} held {}", i, in_period);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_do_not_overshoot() {
        let limiter = RateLimiter::new(2, Duration::from_secs(5));
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now().duration_since(start)
                })
            })
            .collect();

        let mut offsets = Vec::new();
        for handle in handles {
            offsets.push(handle.await.unwrap());
        }
        offsets.sort();

        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::ZERO);
        assert!(offsets[2] >= Duration::from_secs(5));
        assert!(offsets[3] >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoint_windows_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60))
            .with_endpoint_limit("/v5/order", 1, Duration::from_secs(60));

        assert_eq!(limiter.acquire_for("/v5/market/tickers").await, Duration::ZERO);
        assert_eq!(limiter.acquire_for("/v5/order/create").await, Duration::ZERO);
        assert_eq!(limiter.in_window("/v5/order/cancel").await, 1);
        assert_eq!(limiter.in_window("/v5/account/wallet-balance").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_period() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.in_window("/any").await, 0);
        assert_eq!(limiter.acquire().await, Duration::ZERO);
    }
}
