use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Linear backoff used to win back a lost translation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Wait before `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(attempt)
            .min(self.max_delay)
    }

    /// Sleep and probe until the probe succeeds or the attempts run out.
    ///
    /// Returns the attempt number that succeeded.
    pub async fn run<F, Fut>(&self, mut probe: F) -> Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            let delay = self.delay_for(attempt);
            log::debug!("Reconnect attempt {} in {:?}", attempt, delay);
            tokio::time::sleep(delay).await;

            match probe().await {
                Ok(()) => {
                    log::info!("Reconnected after {} attempt(s)", attempt);
                    return Ok(attempt);
                }
                Err(err) => {
                    log::warn!("Reconnect attempt {} failed: {}", attempt, err);
                    last_error = Some(err);
                }
            }
        }

        let reason = last_error.map_or_else(|| "no attempts allowed".to_string(), |err| err.to_string());
        Err(Error::environment_invalidated(format!(
            "gave up after {} attempts: {}",
            self.max_attempts, reason
        )))
    }
}
