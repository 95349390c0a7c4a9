//! Shell `input` fallback injection
//!
//! Slow (one shell round trip per gesture) but requires nothing installed
//! on the device, so it is always available as a fallback and is what the
//! backend prober starts from.

use crate::adb::AdbTransport;
use crate::config::InjectTimingConfig;
use crate::error::Result;
use crate::inject::builder::{Gesture, GestureEvent};
use std::time::Duration;
use tokio::time::Instant;

/// Injects gestures through `adb shell input`.
pub struct ShellInjector {
    timing: InjectTimingConfig,
}

impl ShellInjector {
    pub fn new(timing: InjectTimingConfig) -> Self {
        Self { timing }
    }

    /// Tap at the given coordinates.
    ///
    /// `input tap` returns before the event settles on some devices;
    /// a minimum post-tap sleep keeps rapid tap sequences from merging.
    pub async fn tap(&self, transport: &AdbTransport, x: i32, y: i32) -> Result<()> {
        let start = Instant::now();
        transport
            .shell(&["input", "tap", &x.to_string(), &y.to_string()])
            .await?;
        let min_delay = Duration::from_secs_f64(self.timing.tap_delay);
        if start.elapsed() < min_delay {
            tokio::time::sleep(min_delay).await;
        }
        Ok(())
    }

    /// Swipe between two points over `duration_ms`.
    pub async fn swipe(
        &self,
        transport: &AdbTransport,
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: u64,
    ) -> Result<()> {
        transport
            .shell(&[
                "input",
                "swipe",
                &from.0.to_string(),
                &from.1.to_string(),
                &to.0.to_string(),
                &to.1.to_string(),
                &duration_ms.to_string(),
            ])
            .await?;
        Ok(())
    }

    /// Replay a gesture batch through `input` calls.
    ///
    /// The line protocol is richer than `input` can express; contiguous
    /// down/move/up groups collapse into one tap or swipe and waits become
    /// sleeps. Good enough for the fallback role.
    pub async fn send(&self, transport: &AdbTransport, gesture: Gesture) -> Result<()> {
        let mut down_at: Option<(i32, i32)> = None;
        let mut last_move: Option<(i32, i32)> = None;
        let mut travel_ms: u64 = 0;

        for event in gesture.events() {
            match event {
                GestureEvent::Down { x, y, .. } => {
                    down_at = Some((*x, *y));
                    last_move = None;
                    travel_ms = 0;
                }
                GestureEvent::Move { x, y, .. } => {
                    last_move = Some((*x, *y));
                }
                GestureEvent::Up { .. } => {
                    match (down_at.take(), last_move.take()) {
                        (Some(from), Some(to)) if from != to => {
                            self.swipe(transport, from, to, travel_ms.max(100)).await?;
                        }
                        (Some(at), _) => {
                            self.tap(transport, at.0, at.1).await?;
                        }
                        (None, _) => {}
                    }
                    travel_ms = 0;
                }
                GestureEvent::Wait { ms } => {
                    if down_at.is_some() {
                        // While a contact is held, waits shape the swipe duration
                        travel_ms += ms;
                    } else {
                        tokio::time::sleep(Duration::from_millis(*ms)).await;
                    }
                }
                GestureEvent::Commit => {}
            }
        }
        Ok(())
    }
}
