//! Call Timeout Management
//!
//! Every external call the agent makes (runtime commands, health probes,
//! metrics queries) is bounded so a hung collaborator degrades a single
//! sample instead of stalling the loop.

use std::time::Duration;
use thiserror::Error;
use tokio::time;

/// Error returned when a bounded call does not finish in time
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Timeout applied to a single external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeout {
    duration: Duration,
}

impl Default for CallTimeout {
    fn default() -> Self {
        Self::control()
    }
}

impl CallTimeout {
    /// Create a new call timeout
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Timeout for runtime control calls (30 seconds, default)
    pub fn control() -> Self {
        Self::from_secs(30)
    }

    /// Timeout for health probes (3 seconds)
    pub fn probe() -> Self {
        Self::from_secs(3)
    }

    /// Timeout for metrics queries (4 seconds)
    pub fn query() -> Self {
        Self::from_secs(4)
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Execute a future with this timeout
    ///
    /// # Returns
    ///
    /// The future's output if it completes in time, or [`TimedOut`].
    pub async fn run<F, T>(&self, future: F) -> Result<T, TimedOut>
    where
        F: std::future::Future<Output = T>,
    {
        time::timeout(self.duration, future)
            .await
            .map_err(|_| TimedOut(self.duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_defaults() {
        assert_eq!(CallTimeout::default().duration(), Duration::from_secs(30));
        assert_eq!(CallTimeout::probe().duration(), Duration::from_secs(3));
        assert_eq!(CallTimeout::query().duration(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timeout_run_success() {
        let result = CallTimeout::probe().run(async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_run_expires() {
        let timeout = CallTimeout::from_secs(1);

        let result = timeout
            .run(async {
                tokio::time::sleep(Duration::from_secs(2)).await;
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err, TimedOut(Duration::from_secs(1)));
        assert!(err.to_string().contains("timed out"));
    }
}
