//! Gesture builder and text wire protocol
//!
//! Touch helpers speak a line protocol: one event per line, a `c` line
//! commits everything queued since the previous commit, and the helper
//! applies committed batches in transmission order. The builder accumulates
//! events, the [`Gesture`] is the committed batch, consumed exactly once by
//! the active injector's `send`.

use crate::config::{InjectTimingConfig, SwipeConfig};
use crate::error::{DeviceError, Result};
use crate::util::random_in;

pub const DEFAULT_CONTACT: i32 = 0;
pub const DEFAULT_PRESSURE: i32 = 50;

/// One touch protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureEvent {
    Down {
        contact: i32,
        x: i32,
        y: i32,
        pressure: i32,
    },
    Move {
        contact: i32,
        x: i32,
        y: i32,
        pressure: i32,
    },
    Up {
        contact: i32,
    },
    Wait {
        ms: u64,
    },
    Commit,
}

impl GestureEvent {
    fn to_line(&self) -> String {
        match self {
            GestureEvent::Down {
                contact,
                x,
                y,
                pressure,
            } => format!("d {} {} {} {}", contact, x, y, pressure),
            GestureEvent::Move {
                contact,
                x,
                y,
                pressure,
            } => format!("m {} {} {} {}", contact, x, y, pressure),
            GestureEvent::Up { contact } => format!("u {}", contact),
            GestureEvent::Wait { ms } => format!("w {}", ms),
            GestureEvent::Commit => "c".to_string(),
        }
    }
}

/// An ordered batch of touch events, ready for one transmission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gesture {
    events: Vec<GestureEvent>,
}

impl Gesture {
    pub fn events(&self) -> &[GestureEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Count of touch events, excluding commits and waits. The text
    /// backend multiplies this by its per-event processing delay.
    pub fn touch_event_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    GestureEvent::Down { .. } | GestureEvent::Move { .. } | GestureEvent::Up { .. }
                )
            })
            .count()
    }

    /// Sum of explicit waits carried by the batch, in milliseconds.
    pub fn total_wait_ms(&self) -> u64 {
        self.events
            .iter()
            .filter_map(|e| match e {
                GestureEvent::Wait { ms } => Some(*ms),
                _ => None,
            })
            .sum()
    }

    /// Serialize into the newline-terminated wire form.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_line());
            out.push('\n');
        }
        out
    }

    /// Parse the wire form back into events. Inverse of [`Self::to_wire`];
    /// used for diagnostics and round-trip checks.
    pub fn parse_wire(wire: &str) -> Result<Gesture> {
        let mut events = Vec::new();
        for line in wire.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(op) = parts.next() else {
                continue;
            };
            let mut num = |what: &str| -> Result<i64> {
                parts
                    .next()
                    .ok_or_else(|| DeviceError::Parse(format!("missing {} in {:?}", what, line)))?
                    .parse()
                    .map_err(|_| DeviceError::Parse(format!("bad {} in {:?}", what, line)))
            };
            let event = match op {
                "d" => GestureEvent::Down {
                    contact: num("contact")? as i32,
                    x: num("x")? as i32,
                    y: num("y")? as i32,
                    pressure: num("pressure")? as i32,
                },
                "m" => GestureEvent::Move {
                    contact: num("contact")? as i32,
                    x: num("x")? as i32,
                    y: num("y")? as i32,
                    pressure: num("pressure")? as i32,
                },
                "u" => GestureEvent::Up {
                    contact: num("contact")? as i32,
                },
                "w" => GestureEvent::Wait {
                    ms: num("ms")? as u64,
                },
                "c" => GestureEvent::Commit,
                other => {
                    return Err(DeviceError::Parse(format!(
                        "unknown touch op {:?}",
                        other
                    )))
                }
            };
            events.push(event);
        }
        Ok(Gesture { events })
    }
}

/// Accumulates events into a [`Gesture`].
///
/// `commit` finalizes the line queued so far; `build` hands the batch over
/// and clears the builder for reuse.
#[derive(Debug, Default)]
pub struct GestureBuilder {
    events: Vec<GestureEvent>,
}

impl GestureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn down(&mut self, x: i32, y: i32) -> &mut Self {
        self.down_with(DEFAULT_CONTACT, x, y, DEFAULT_PRESSURE)
    }

    pub fn down_with(&mut self, contact: i32, x: i32, y: i32, pressure: i32) -> &mut Self {
        self.events.push(GestureEvent::Down {
            contact,
            x,
            y,
            pressure,
        });
        self
    }

    pub fn move_to(&mut self, x: i32, y: i32) -> &mut Self {
        self.move_with(DEFAULT_CONTACT, x, y, DEFAULT_PRESSURE)
    }

    pub fn move_with(&mut self, contact: i32, x: i32, y: i32, pressure: i32) -> &mut Self {
        self.events.push(GestureEvent::Move {
            contact,
            x,
            y,
            pressure,
        });
        self
    }

    pub fn up(&mut self) -> &mut Self {
        self.up_contact(DEFAULT_CONTACT)
    }

    pub fn up_contact(&mut self, contact: i32) -> &mut Self {
        self.events.push(GestureEvent::Up { contact });
        self
    }

    pub fn wait(&mut self, ms: u64) -> &mut Self {
        if ms > 0 {
            self.events.push(GestureEvent::Wait { ms });
        }
        self
    }

    pub fn commit(&mut self) -> &mut Self {
        self.events.push(GestureEvent::Commit);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hand over the accumulated batch and clear the builder.
    pub fn build(&mut self) -> Gesture {
        Gesture {
            events: std::mem::take(&mut self.events),
        }
    }
}

/// Synthesize a tap: down, brief hold, up.
pub fn synthesize_tap(x: i32, y: i32) -> Gesture {
    let mut b = GestureBuilder::new();
    b.down(x, y).commit().wait(10);
    b.up().commit();
    b.build()
}

/// Synthesize a long press with the given hold duration.
pub fn synthesize_long_press(x: i32, y: i32, duration_ms: u64) -> Gesture {
    let mut b = GestureBuilder::new();
    b.down(x, y).commit().wait(duration_ms);
    b.up().commit();
    b.build()
}

/// Synthesize a swipe: down, interpolated moves with positional and timing
/// jitter, a dwell at the destination, then up.
///
/// Endpoints closer than the configured minimum distance produce no
/// gesture: such a swipe degenerates into an accidental click, so it is
/// dropped as a successful no-op and the caller taps explicitly if a tap
/// was intended.
pub fn synthesize_swipe(
    from: (i32, i32),
    to: (i32, i32),
    swipe: &SwipeConfig,
    timing: &InjectTimingConfig,
) -> Option<Gesture> {
    let (dx, dy) = ((to.0 - from.0) as f64, (to.1 - from.1) as f64);
    let distance = (dx * dx + dy * dy).sqrt();
    if distance < swipe.min_distance {
        return None;
    }

    let segments = ((distance / swipe.segment_len).ceil() as usize).max(2);
    let jitter = &swipe.jitter;
    let mut b = GestureBuilder::new();

    b.down(from.0, from.1).commit();
    b.wait(wait_with_jitter(timing.swipe_point_wait_ms, jitter.point_ms));

    for i in 1..=segments {
        let t = i as f64 / segments as f64;
        let mut x = from.0 + (dx * t) as i32;
        let mut y = from.1 + (dy * t) as i32;
        if i < segments {
            x += random_in(jitter.point_px.0 as i64, jitter.point_px.1 as i64) as i32;
            y += random_in(jitter.point_px.0 as i64, jitter.point_px.1 as i64) as i32;
        }
        b.move_to(x, y).commit();
        b.wait(wait_with_jitter(timing.swipe_point_wait_ms, jitter.point_ms));
    }

    // Dwell at the destination so the scroll settles instead of flinging
    for _ in 0..2 {
        b.move_to(to.0, to.1).commit();
        b.wait(timing.swipe_dwell_ms);
    }

    b.up().commit();
    Some(b.build())
}

fn wait_with_jitter(base_ms: u64, range: (u64, u64)) -> u64 {
    base_ms + random_in(range.0 as i64, range.1 as i64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip() {
        let mut b = GestureBuilder::new();
        b.down(100, 200).commit();
        b.move_to(110, 210).commit();
        b.move_to(120, 220).commit();
        b.move_to(130, 230).commit();
        b.up().commit();
        let gesture = b.build();

        let wire = gesture.to_wire();
        let parsed = Gesture::parse_wire(&wire).unwrap();
        assert_eq!(parsed, gesture);
    }

    #[test]
    fn wire_lines_match_protocol() {
        let mut b = GestureBuilder::new();
        b.down_with(1, 5, 6, 42).commit().wait(30);
        b.up_contact(1).commit();
        let wire = b.build().to_wire();
        assert_eq!(wire, "d 1 5 6 42\nc\nw 30\nu 1\nc\n");
    }

    #[test]
    fn parse_rejects_malformed_lines() {
        assert!(Gesture::parse_wire("d 0 10").is_err());
        assert!(Gesture::parse_wire("x 1 2 3 4").is_err());
        assert!(Gesture::parse_wire("w abc").is_err());
    }

    #[test]
    fn builder_clears_after_build() {
        let mut b = GestureBuilder::new();
        b.down(1, 1).commit();
        let first = b.build();
        assert!(!first.is_empty());
        assert!(b.is_empty());
        assert!(b.build().is_empty());
    }

    #[test]
    fn touch_event_count_ignores_waits_and_commits() {
        let mut b = GestureBuilder::new();
        b.down(0, 0).commit().wait(10);
        b.move_to(1, 1).commit();
        b.up().commit();
        let g = b.build();
        assert_eq!(g.touch_event_count(), 3);
        assert_eq!(g.total_wait_ms(), 10);
    }

    fn test_configs() -> (SwipeConfig, InjectTimingConfig) {
        let swipe = SwipeConfig::default();
        let timing = InjectTimingConfig {
            tap_delay: 0.0,
            swipe_point_wait_ms: 10,
            swipe_dwell_ms: 140,
        };
        (swipe, timing)
    }

    #[test]
    fn long_swipe_emits_down_moves_up() {
        let (swipe, timing) = test_configs();
        let g = synthesize_swipe((100, 500), (100, 100), &swipe, &timing).unwrap();
        let events = g.events();
        assert!(matches!(events[0], GestureEvent::Down { .. }));
        assert!(matches!(events[events.len() - 2], GestureEvent::Up { .. }));
        assert!(matches!(events[events.len() - 1], GestureEvent::Commit));
        let moves = events
            .iter()
            .filter(|e| matches!(e, GestureEvent::Move { .. }))
            .count();
        // 400px at ~40px per segment, plus the two dwell moves
        assert!(moves >= 10);
    }

    #[test]
    fn short_swipe_is_dropped() {
        let (swipe, timing) = test_configs();
        assert!(synthesize_swipe((100, 500), (103, 500), &swipe, &timing).is_none());
    }

    #[test]
    fn swipe_ends_exactly_at_destination() {
        let (swipe, timing) = test_configs();
        let g = synthesize_swipe((0, 0), (200, 0), &swipe, &timing).unwrap();
        let last_move = g
            .events()
            .iter()
            .rev()
            .find_map(|e| match e {
                GestureEvent::Move { x, y, .. } => Some((*x, *y)),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_move, (200, 0));
    }

    #[test]
    fn swipe_jitter_stays_in_bounds() {
        let (swipe, timing) = test_configs();
        let g = synthesize_swipe((0, 0), (0, 400), &swipe, &timing).unwrap();
        for e in g.events() {
            if let GestureEvent::Move { x, .. } = e {
                assert!((swipe.jitter.point_px.0..=swipe.jitter.point_px.1).contains(x));
            }
        }
    }
}
