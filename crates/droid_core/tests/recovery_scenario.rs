//! End-to-end recovery scenarios: a transport loss mid-call is remediated
//! by reconnect and the call succeeds on the retry, while budget
//! exhaustion surfaces a single terminal error carrying the last cause.

use droid_core::{classify, DeviceError, ErrorCategory, RetryConfig, RetryContext};
use std::cell::RefCell;

/// Minimal stand-in for the session side of remediation: capture fails
/// while the link is down, reconnect restores it.
struct ScriptedLink {
    alive: bool,
    /// Failures still to inject once the link is up again
    failures_left: u32,
    reconnects: u32,
    captures: u32,
}

impl ScriptedLink {
    fn new(failures: u32) -> Self {
        Self {
            alive: true,
            failures_left: failures,
            reconnects: 0,
            captures: 0,
        }
    }

    fn capture(&mut self) -> Result<&'static str, DeviceError> {
        if !self.alive {
            return Err(DeviceError::TransportLost("link is down".to_string()));
        }
        if self.failures_left > 0 {
            self.failures_left -= 1;
            self.alive = false;
            return Err(DeviceError::TransportLost(
                "connection reset mid-capture".to_string(),
            ));
        }
        self.captures += 1;
        Ok("frame")
    }

    fn reconnect(&mut self) {
        self.reconnects += 1;
        self.alive = true;
    }
}

async fn capture_with_recovery(
    link: &RefCell<ScriptedLink>,
    tries: u32,
) -> Result<&'static str, DeviceError> {
    let mut ctx = RetryContext::new(&RetryConfig { tries, delay: 0.0 });
    loop {
        let attempt = link.borrow_mut().capture();
        match attempt {
            Ok(frame) => return Ok(frame),
            Err(e) => {
                let category = ctx.record(e)?;
                if category == ErrorCategory::TransportLost {
                    link.borrow_mut().reconnect();
                }
                ctx.backoff().await;
            }
        }
    }
}

#[tokio::test]
async fn severed_transport_recovers_after_one_retry() {
    let link = RefCell::new(ScriptedLink::new(1));
    let frame = capture_with_recovery(&link, 5).await.unwrap();
    assert_eq!(frame, "frame");

    let link = link.into_inner();
    // Exactly one reconnect remediation and exactly one successful capture
    assert_eq!(link.reconnects, 1);
    assert_eq!(link.captures, 1);
}

#[tokio::test]
async fn persistent_loss_exhausts_into_needs_operator() {
    let link = RefCell::new(ScriptedLink::new(100));
    let err = capture_with_recovery(&link, 4).await.unwrap_err();

    match err {
        DeviceError::NeedsOperator { attempts, source } => {
            assert_eq!(attempts, 4);
            assert_eq!(classify(&source), ErrorCategory::TransportLost);
        }
        other => panic!("expected NeedsOperator, got {:?}", other),
    }
    // Remediation ran on every non-final failure
    assert_eq!(link.into_inner().reconnects, 3);
}

#[tokio::test]
async fn watchdog_errors_are_never_retried() {
    let mut ctx = RetryContext::new(&RetryConfig { tries: 5, delay: 0.0 });
    let err = ctx
        .record(DeviceError::InputLoopDetected("same button".to_string()))
        .unwrap_err();
    assert!(matches!(err, DeviceError::InputLoopDetected(_)));
    assert_eq!(ctx.attempts(), 0);
}
