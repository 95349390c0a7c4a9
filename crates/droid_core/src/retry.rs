//! Bounded retry with categorized remediation
//!
//! Device calls wrap their attempts in a [`RetryContext`]: each failure is
//! classified into a category, the caller runs the remediation bound to
//! that category (reconnect, reinstall a helper, nothing), and resubmits.
//! Exhausting the budget converts the last failure into a terminal
//! `NeedsOperator`. Remediations must stay idempotent; nested retrying
//! calls may run them more than once.

use crate::config::RetryConfig;
use crate::error::{DeviceError, Result};
use std::time::Duration;
use tracing::warn;

/// Failure categories the recovery engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    TransportLost,
    CaptureCorrupted,
    CaptureToolMissing,
    InjectionToolMissing,
    Other,
}

/// Map an error onto its recovery category.
pub fn classify(err: &DeviceError) -> ErrorCategory {
    match err {
        DeviceError::TransportLost(_) => ErrorCategory::TransportLost,
        DeviceError::CaptureCorrupted(_) => ErrorCategory::CaptureCorrupted,
        DeviceError::CaptureToolMissing(_) => ErrorCategory::CaptureToolMissing,
        DeviceError::InjectionToolMissing(_) => ErrorCategory::InjectionToolMissing,
        _ => ErrorCategory::Other,
    }
}

/// Delay before re-running a failed attempt. The first retry goes
/// immediately; later ones back off linearly up to a cap.
pub fn retry_sleep(failed_attempts: u32, base: f64) -> f64 {
    if failed_attempts <= 1 {
        0.0
    } else {
        (base * (failed_attempts - 1) as f64).min(base * 3.0)
    }
}

/// Per-call retry state. Created at the top of one retrying call, dropped
/// when the call returns.
#[derive(Debug)]
pub struct RetryContext {
    tries: u32,
    base_delay: f64,
    attempts: u32,
    last_category: Option<ErrorCategory>,
}

impl RetryContext {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            tries: config.tries.max(1),
            base_delay: config.delay,
            attempts: 0,
            last_category: None,
        }
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_category(&self) -> Option<ErrorCategory> {
        self.last_category
    }

    /// Record one failure.
    ///
    /// Returns the category to remediate while budget remains. Terminal
    /// errors pass through untouched; an exhausted budget converts the
    /// failure into `NeedsOperator` carrying it as the cause.
    pub fn record(&mut self, err: DeviceError) -> Result<ErrorCategory> {
        if err.is_terminal() {
            return Err(err);
        }
        self.attempts += 1;
        if self.attempts >= self.tries {
            warn!("Retry budget of {} attempts exhausted: {}", self.tries, err);
            return Err(DeviceError::NeedsOperator {
                attempts: self.attempts,
                source: Box::new(err),
            });
        }
        let category = classify(&err);
        warn!(
            "Attempt {}/{} failed ({:?}): {}",
            self.attempts, self.tries, category, err
        );
        self.last_category = Some(category);
        Ok(category)
    }

    /// Sleep the configured inter-attempt delay.
    pub async fn backoff(&self) {
        let secs = retry_sleep(self.attempts, self.base_delay);
        if secs > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(secs)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn policy(tries: u32) -> RetryConfig {
        RetryConfig { tries, delay: 0.0 }
    }

    /// Harness mirroring how device calls drive the context: attempt,
    /// classify, remediate, resubmit.
    async fn run_with_retry<F>(tries: u32, mut op: F) -> (Result<u32>, HashMap<ErrorCategory, u32>)
    where
        F: FnMut(u32) -> Result<u32>,
    {
        let mut ctx = RetryContext::new(&policy(tries));
        let mut remediations: HashMap<ErrorCategory, u32> = HashMap::new();
        loop {
            match op(ctx.attempts()) {
                Ok(v) => return (Ok(v), remediations),
                Err(e) => match ctx.record(e) {
                    Ok(category) => {
                        *remediations.entry(category).or_default() += 1;
                        ctx.backoff().await;
                    }
                    Err(terminal) => return (Err(terminal), remediations),
                },
            }
        }
    }

    #[tokio::test]
    async fn succeeds_on_fourth_attempt() {
        let (result, remediations) = run_with_retry(4, |failed| {
            if failed < 3 {
                Err(DeviceError::TransportLost("simulated".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(remediations[&ErrorCategory::TransportLost], 3);
    }

    #[tokio::test]
    async fn exhaustion_raises_needs_operator_with_last_cause() {
        let (result, remediations) = run_with_retry(4, |_| {
            Err(DeviceError::TransportLost("still down".to_string()))
        })
        .await;
        match result.unwrap_err() {
            DeviceError::NeedsOperator { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, DeviceError::TransportLost(_)));
            }
            other => panic!("expected NeedsOperator, got {:?}", other),
        }
        // The final failure is not remediated, only the three before it
        assert_eq!(remediations[&ErrorCategory::TransportLost], 3);
    }

    #[tokio::test]
    async fn terminal_errors_bypass_the_budget() {
        let (result, remediations) = run_with_retry(4, |_| {
            Err(DeviceError::InputLoopDetected("tapping OK forever".to_string()))
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            DeviceError::InputLoopDetected(_)
        ));
        assert!(remediations.is_empty());
    }

    #[test]
    fn classification_covers_the_taxonomy() {
        assert_eq!(
            classify(&DeviceError::TransportLost("x".into())),
            ErrorCategory::TransportLost
        );
        assert_eq!(
            classify(&DeviceError::CaptureCorrupted("x".into())),
            ErrorCategory::CaptureCorrupted
        );
        assert_eq!(
            classify(&DeviceError::CaptureToolMissing("x".into())),
            ErrorCategory::CaptureToolMissing
        );
        assert_eq!(
            classify(&DeviceError::InjectionToolMissing("x".into())),
            ErrorCategory::InjectionToolMissing
        );
        assert_eq!(
            classify(&DeviceError::Timeout("x".into())),
            ErrorCategory::Other
        );
    }

    #[test]
    fn backoff_is_immediate_on_the_first_retry() {
        let mut ctx = RetryContext::new(&RetryConfig { tries: 5, delay: 2.0 });
        let _ = ctx.record(DeviceError::Timeout("slow".into()));
        assert_eq!(ctx.attempts(), 1);
        // retry_sleep(1, _) is zero, so this returns without sleeping
        tokio_test::block_on(ctx.backoff());
    }

    #[test]
    fn retry_sleep_grows_then_caps() {
        assert_eq!(retry_sleep(1, 0.5), 0.0);
        assert_eq!(retry_sleep(2, 0.5), 0.5);
        assert_eq!(retry_sleep(3, 0.5), 1.0);
        assert_eq!(retry_sleep(10, 0.5), 1.5);
    }
}
