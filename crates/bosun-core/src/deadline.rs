use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::error::{ControlError, ControlResult};

/// The wall-clock budget of a request.
///
/// The budget covers the whole request; every sub-operation asks for the
/// remaining share and fails with a timeout once it is exhausted.
#[derive(Debug, Clone)]
pub struct Deadline {
    start: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            start: Instant::now(),
            budget,
        }
    }

    /// The remaining budget, or a timeout error when it is exhausted.
    pub fn remaining(&self, op: &str) -> ControlResult<Duration> {
        let elapsed = self.start.elapsed();
        match self.budget.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => {
                debug!(
                    "{op}: configured request timeout: {} ms, remaining time: {} ms",
                    self.budget.as_millis(),
                    remaining.as_millis()
                );
                Ok(remaining)
            }
            _ => Err(ControlError::RequestTimeout(format!(
                "{op}: no time left of the {} ms request budget",
                self.budget.as_millis()
            ))),
        }
    }

    pub fn remaining_or_zero(&self) -> Duration {
        self.budget.saturating_sub(self.start.elapsed())
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[tokio::test]
    async fn test_remaining_budget() {
        let deadline = Deadline::new(Duration::from_secs(10));
        let remaining = deadline.remaining("test").unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_exhausted_budget() {
        let deadline = Deadline::new(Duration::ZERO);
        let error = deadline.remaining("test").unwrap_err();
        assert_eq!(error.code(), ErrorCode::RequestTimeout);
        assert_eq!(deadline.remaining_or_zero(), Duration::ZERO);
    }
}
