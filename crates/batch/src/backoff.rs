//! Jittered exponential backoff bounded by a maximum elapsed time.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Retry schedule parameters. Each retried chunk starts a fresh [`Backoff`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    /// Each delay is drawn uniformly from `interval * (1 ± randomization)`.
    pub randomization: f64,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl BackoffPolicy {
    pub fn new(max_elapsed: Duration) -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            randomization: 0.5,
            max_interval: Duration::from_secs(60),
            max_elapsed,
        }
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_randomization(mut self, randomization: f64) -> Self {
        self.randomization = randomization.clamp(0.0, 1.0);
        self
    }

    pub fn start(&self) -> Backoff {
        Backoff {
            policy: *self,
            current: self.initial_interval,
            started: Instant::now(),
        }
    }
}

/// A running backoff schedule.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    current: Duration,
    started: Instant,
}

impl Backoff {
    /// Delay before the next attempt, or `None` once the elapsed budget
    /// would be exceeded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let delay = jitter(self.current, self.policy.randomization);
        if self.started.elapsed() + delay > self.policy.max_elapsed {
            return None;
        }

        let grown = self.current.mul_f64(self.policy.multiplier);
        self.current = grown.min(self.policy.max_interval);
        Some(delay)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

fn jitter(interval: Duration, randomization: f64) -> Duration {
    if randomization <= 0.0 {
        return interval;
    }
    let base = interval.as_secs_f64();
    let delta = base * randomization;
    let secs = rand::thread_rng().gen_range((base - delta)..=(base + delta));
    Duration::from_secs_f64(secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn grows_geometrically_without_jitter() {
        let policy = BackoffPolicy::new(Duration::from_secs(60)).with_randomization(0.0);
        let mut backoff = policy.start();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(500)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(750)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(1125)));
    }

    #[tokio::test(start_paused = true)]
    async fn caps_at_max_interval() {
        let mut policy = BackoffPolicy::new(Duration::from_secs(600)).with_randomization(0.0);
        policy.max_interval = Duration::from_secs(1);
        let mut backoff = policy.start();
        for _ in 0..10 {
            let delay = backoff.next_delay().unwrap();
            assert!(delay <= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_elapsed_budget_is_spent() {
        let policy = BackoffPolicy::new(Duration::from_secs(2)).with_randomization(0.0);
        let mut backoff = policy.start();
        let mut total = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            tokio::time::sleep(delay).await;
            total += delay;
        }
        assert!(total <= Duration::from_secs(2));
        assert!(total >= Duration::from_millis(1250));
    }

    #[test]
    fn jitter_stays_within_band() {
        for _ in 0..100 {
            let d = jitter(Duration::from_millis(1000), 0.5);
            assert!(d >= Duration::from_millis(500));
            assert!(d <= Duration::from_millis(1500));
        }
    }
}
