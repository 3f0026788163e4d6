use std::time::Duration;
use tokio::time::sleep;

/// Capped exponential delay between reconnect attempts
///
/// Never gives up: the listener retries for as long as the process runs.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max.max(initial),
            current_attempt: 0,
        }
    }

    /// Delay for the next attempt, advancing the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.current_attempt.min(31));
        let delay = self.initial_delay.saturating_mul(factor).min(self.max_delay);
        self.current_attempt = self.current_attempt.saturating_add(1);
        delay
    }

    pub async fn sleep(&mut self) {
        let delay = self.next_delay();

        log::warn!(
            "⏳ Reconnect attempt {} in {}ms",
            self.current_attempt,
            delay.as_millis()
        );

        sleep(delay).await;
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }
}
