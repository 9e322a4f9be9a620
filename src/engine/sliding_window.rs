use std::time::Duration;
use tokio::time::Instant;

/// Caps the total number of messages the fetch loop emits within a rolling
/// time window, regardless of worker count. Owned
/// exclusively by the fetch loop — no locking, since it is never touched
/// from any other task.
pub struct SlidingWindowLimiter {
    enabled: bool,
    window_duration: Duration,
    max_messages: usize,
    window_start: Instant,
    count: usize,
}

impl SlidingWindowLimiter {
    pub fn new(enabled: bool, window_duration: Duration, max_messages: usize) -> Self {
        Self {
            enabled,
            window_duration,
            max_messages,
            window_start: Instant::now(),
            count: 0,
        }
    }

    fn is_active(&self) -> bool {
        self.enabled && self.window_duration.as_secs_f64() > 1.0 && self.max_messages > 0
    }

    /// Called once after each message push. Blocks (sleeps) the caller when
    /// the window's cap has been hit.
    pub async fn record_push(&mut self) {
        if !self.is_active() {
            return;
        }

        let elapsed = self.window_start.elapsed();
        if elapsed >= self.window_duration {
            self.window_start = Instant::now();
            self.count = 0;
            return;
        }

        self.count += 1;
        if self.count >= self.max_messages {
            let wait = self.window_duration - elapsed;
            tracing::info!(
                count = self.count,
                ?wait,
                "sliding window limit reached, pausing dispatch"
            );
            tokio::time::sleep(wait).await;
            self.window_start = Instant::now();
            self.count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_limiter_never_sleeps() {
        let mut limiter = SlidingWindowLimiter::new(false, Duration::from_millis(50), 1);
        let start = Instant::now();
        for _ in 0..1000 {
            limiter.record_push().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn zero_duration_or_rate_disables_limiting() {
        let mut zero_duration = SlidingWindowLimiter::new(true, Duration::from_millis(0), 5);
        let mut zero_rate = SlidingWindowLimiter::new(true, Duration::from_secs(1), 0);
        let start = Instant::now();
        for _ in 0..50 {
            zero_duration.record_push().await;
            zero_rate.record_push().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn caps_messages_per_window() {
        let mut limiter = SlidingWindowLimiter::new(true, Duration::from_secs(1), 5);
        let start = Instant::now();
        for _ in 0..20 {
            limiter.record_push().await;
        }
        // 20 messages at 5/window => at least 3 full windows elapsed.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
