use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Fixed delay between reconnect attempts; retries are unlimited
#[derive(Debug)]
pub struct ReconnectDelay {
    delay: Duration,
    attempt: u64,
}

impl ReconnectDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay, attempt: 0 }
    }

    /// Sleep before the next attempt. Returns false when `token` was
    /// cancelled while waiting.
    pub async fn wait(&mut self, token: &CancellationToken) -> bool {
        self.attempt += 1;
        log::warn!(
            "⏳ Reconnect attempt {} in {}ms",
            self.attempt,
            self.delay.as_millis()
        );

        tokio::select! {
            _ = token.cancelled() => false,
            _ = sleep(self.delay) => true,
        }
    }

    pub fn attempts(&self) -> u64 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
