//! Minimum spacing between outbound rate requests

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Duration, Instant};

/// Hands out request slots at least `min_interval` apart.
///
/// Callers queue on the mutex, so spacing holds across concurrent workers.
pub struct RequestPacer {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next slot is free and claim it
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut next_slot = self.next_slot.lock().await;

        if let Some(at) = *next_slot {
            if at > Instant::now() {
                sleep_until(at).await;
            }
        }

        *next_slot = Some(Instant::now() + self.min_interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_spaces_consecutive_requests() {
        let pacer = RequestPacer::new(Duration::from_millis(100));
        let start = Instant::now();

        pacer.wait().await;
        pacer.wait().await;
        pacer.wait().await;

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let pacer = RequestPacer::new(Duration::from_secs(5));
        let start = Instant::now();

        pacer.wait().await;

        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_sleeps() {
        let pacer = RequestPacer::new(Duration::ZERO);
        let start = Instant::now();

        for _ in 0..10 {
            pacer.wait().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
