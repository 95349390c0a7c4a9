//! Stuck and loop watchdog
//!
//! Two independent advisory checks. Neither ever blocks or wraps the
//! underlying call; they only inspect cadence and recent history before a
//! new operation starts.
//!
//! The stuck timer is debounced on two axes: wall time and poll count.
//! One slow capture can eat most of the deadline on its own, so elapsed
//! time alone would misfire on a cold machine; requiring a confirm count
//! of polls past the deadline keeps it honest.

use crate::config::WatchdogConfig;
use crate::error::{DeviceError, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

const LOOP_WINDOW: usize = 30;
const LOOP_RECENT: usize = 15;
const SINGLE_ID_THRESHOLD: u32 = 12;
const PAIR_ID_THRESHOLD: u32 = 6;

/// Debounced deadline timer.
#[derive(Debug)]
pub struct StuckTimer {
    limit: Duration,
    confirm: u32,
    started_at: Instant,
    polls: u32,
}

impl StuckTimer {
    pub fn new(limit: Duration, confirm: u32) -> Self {
        Self {
            limit,
            confirm,
            started_at: Instant::now(),
            polls: 0,
        }
    }

    /// One poll. True only when both the deadline and the confirm count
    /// have been exceeded.
    pub fn expired(&mut self) -> bool {
        self.polls += 1;
        self.started_at.elapsed() > self.limit && self.polls > self.confirm
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn reset(&mut self) {
        self.started_at = Instant::now();
        self.polls = 0;
    }
}

/// Detects an automation loop hammering the same few operations.
#[derive(Debug)]
pub struct LoopDetector {
    record: VecDeque<String>,
    allowance: HashMap<String, u32>,
}

impl LoopDetector {
    pub fn new(allowance: HashMap<String, u32>) -> Self {
        Self {
            record: VecDeque::with_capacity(LOOP_WINDOW),
            allowance,
        }
    }

    fn threshold_for(&self, id: &str) -> u32 {
        self.allowance
            .get(id)
            .copied()
            .map(|t| t.max(SINGLE_ID_THRESHOLD))
            .unwrap_or(SINGLE_ID_THRESHOLD)
    }

    pub fn push(&mut self, id: &str) {
        if self.record.len() == LOOP_WINDOW {
            self.record.pop_front();
        }
        self.record.push_back(id.to_string());
    }

    pub fn clear(&mut self) {
        self.record.clear();
    }

    fn counts<'a, I: Iterator<Item = &'a String>>(iter: I) -> HashMap<&'a str, u32> {
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for id in iter {
            *counts.entry(id.as_str()).or_default() += 1;
        }
        counts
    }

    /// Inspect the window. Firing clears the record so one loop is
    /// reported once.
    pub fn check(&mut self) -> Result<()> {
        let recent_start = self.record.len().saturating_sub(LOOP_RECENT);
        let recent = Self::counts(self.record.iter().skip(recent_start));
        if let Some((id, count)) = recent.into_iter().max_by_key(|(_, c)| *c) {
            if count >= self.threshold_for(id) {
                let msg = format!("{} repeated {} times in the last {}", id, count, LOOP_RECENT);
                warn!("Too many operations for one target: {}", msg);
                self.clear();
                return Err(DeviceError::InputLoopDetected(msg));
            }
        }

        let full = Self::counts(self.record.iter());
        let mut heavy: Vec<(&str, u32)> = full
            .into_iter()
            .filter(|(_, c)| *c >= PAIR_ID_THRESHOLD)
            .collect();
        if heavy.len() >= 2 {
            heavy.sort_by(|a, b| b.1.cmp(&a.1));
            let msg = format!(
                "alternating between {} ({}x) and {} ({}x)",
                heavy[0].0, heavy[0].1, heavy[1].0, heavy[1].1
            );
            warn!("Too many operations between two targets: {}", msg);
            self.clear();
            return Err(DeviceError::InputLoopDetected(msg));
        }
        Ok(())
    }
}

/// Combined watchdog state for one session.
#[derive(Debug)]
pub struct Watchdog {
    stuck: StuckTimer,
    loops: LoopDetector,
    waiting_for: HashSet<String>,
}

impl Watchdog {
    pub fn new(config: &WatchdogConfig) -> Self {
        Self {
            stuck: StuckTimer::new(
                Duration::from_secs_f64(config.stuck_limit),
                config.stuck_confirm,
            ),
            loops: LoopDetector::new(config.loop_allowance.clone()),
            waiting_for: HashSet::new(),
        }
    }

    /// Note a target the caller is currently waiting to appear; shown in
    /// the unresponsive report.
    pub fn note_wait(&mut self, id: &str) {
        self.waiting_for.insert(id.to_string());
    }

    /// Poll before a capture. Fires `DeviceUnresponsive` when no progress
    /// has been observed for too long, then resets for the next episode.
    pub fn check_stuck(&mut self) -> Result<()> {
        if !self.stuck.expired() {
            return Ok(());
        }
        let waiting = if self.waiting_for.is_empty() {
            "nothing in particular".to_string()
        } else {
            let mut ids: Vec<&str> = self.waiting_for.iter().map(String::as_str).collect();
            ids.sort_unstable();
            ids.join(", ")
        };
        let err = DeviceError::DeviceUnresponsive {
            elapsed: self.stuck.elapsed().as_secs_f64(),
            polls: self.stuck.polls(),
            waiting_for: waiting,
        };
        warn!("Wait too long: {}", err);
        self.progress();
        Err(err)
    }

    /// Record one injected operation and inspect the loop window.
    pub fn record_operation(&mut self, id: &str) -> Result<()> {
        self.progress();
        self.loops.push(id);
        self.loops.check()
    }

    /// Observed progress: reset the stuck timer and the wait set.
    pub fn progress(&mut self) {
        self.stuck.reset();
        self.waiting_for.clear();
    }

    /// Full reset, e.g. on app restart or reconnect.
    pub fn reset(&mut self) {
        self.progress();
        self.loops.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn stuck_timer_requires_both_conditions() {
        let mut timer = StuckTimer::new(Duration::from_secs(5), 3);
        // Polls at t=1..=5: either elapsed or count still under threshold
        for _ in 0..5 {
            advance(Duration::from_secs(1)).await;
            assert!(!timer.expired());
        }
        // t=6, sixth poll: elapsed 6 > 5 and polls 6 > 3
        advance(Duration::from_secs(1)).await;
        assert!(timer.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_timer_elapsed_alone_is_not_enough() {
        let mut timer = StuckTimer::new(Duration::from_secs(5), 3);
        advance(Duration::from_secs(60)).await;
        // One slow poll far past the deadline: confirm count not reached
        assert!(!timer.expired());
        assert!(!timer.expired());
        assert!(!timer.expired());
        assert!(timer.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_timer_reset_on_progress() {
        let mut timer = StuckTimer::new(Duration::from_secs(5), 3);
        for _ in 0..10 {
            advance(Duration::from_secs(1)).await;
            timer.expired();
        }
        timer.reset();
        advance(Duration::from_secs(1)).await;
        assert!(!timer.expired());
    }

    fn detector() -> LoopDetector {
        LoopDetector::new(HashMap::new())
    }

    #[test]
    fn twelve_of_fifteen_fires() {
        let mut d = detector();
        for i in 0..3 {
            d.push(&format!("other_{}", i));
        }
        for _ in 0..12 {
            d.push("confirm_button");
        }
        assert!(matches!(
            d.check(),
            Err(DeviceError::InputLoopDetected(_))
        ));
        // Firing clears the window
        assert!(d.check().is_ok());
    }

    #[test]
    fn eleven_of_fifteen_does_not_fire() {
        let mut d = detector();
        for i in 0..4 {
            d.push(&format!("other_{}", i));
        }
        for _ in 0..11 {
            d.push("confirm_button");
        }
        assert!(d.check().is_ok());
    }

    #[test]
    fn two_ids_six_each_over_thirty_fires() {
        let mut d = detector();
        // Interleave so neither id dominates the recent 15
        for i in 0..30 {
            match i % 5 {
                0 => d.push("page_next"),
                1 => d.push("page_prev"),
                _ => d.push(&format!("unique_{}", i)),
            }
        }
        assert!(matches!(
            d.check(),
            Err(DeviceError::InputLoopDetected(_))
        ));
    }

    #[test]
    fn allowance_raises_single_id_threshold() {
        let mut allowance = HashMap::new();
        allowance.insert("reward_collect".to_string(), 25);
        let mut d = LoopDetector::new(allowance);
        for _ in 0..14 {
            d.push("reward_collect");
        }
        assert!(d.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_unresponsive_scenario() {
        let config = WatchdogConfig {
            stuck_limit: 60.0,
            stuck_confirm: 60,
            loop_allowance: HashMap::new(),
        };
        let mut dog = Watchdog::new(&config);
        dog.note_wait("main_menu");
        let mut fired = None;
        for _ in 0..=61 {
            advance(Duration::from_secs(1)).await;
            if let Err(e) = dog.check_stuck() {
                fired = Some(e);
                break;
            }
        }
        match fired.expect("watchdog should have fired") {
            DeviceError::DeviceUnresponsive {
                elapsed,
                polls,
                waiting_for,
            } => {
                assert!(elapsed > 60.0);
                assert!(polls > 60);
                assert!(waiting_for.contains("main_menu"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn record_operation_feeds_loop_detector() {
        let mut dog = Watchdog::new(&WatchdogConfig::default());
        let mut result = Ok(());
        for _ in 0..12 {
            result = dog.record_operation("ok_button");
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(DeviceError::InputLoopDetected(_))));
    }
}
