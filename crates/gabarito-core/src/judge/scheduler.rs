use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between consecutive direct judge calls.
///
/// Owned by the [`super::JudgeClient`]; each call awaits [`CallScheduler::wait_turn`]
/// before hitting the provider.
#[derive(Debug)]
pub struct CallScheduler {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl CallScheduler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// No spacing at all; used by tests and offline runs.
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Sleeps until `min_interval` has passed since the previous turn, then
    /// claims the slot.
    pub async fn wait_turn(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            tokio::time::sleep_until(prev + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_turn_is_immediate_then_spaced() {
        let scheduler = CallScheduler::new(Duration::from_millis(500));
        let start = Instant::now();

        scheduler.wait_turn().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        scheduler.wait_turn().await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let before = Instant::now();
        scheduler.wait_turn().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
    }
}
