//! Small shared helpers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static RNG_STATE: AtomicU64 = AtomicU64::new(0);

/// Cheap xorshift random u64. Gesture jitter and forward-port choice need
/// unpredictability, not cryptographic quality.
pub fn random_u64() -> u64 {
    let mut state = RNG_STATE.load(Ordering::Relaxed);
    if state == 0 {
        state = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9e3779b97f4a7c15)
            | 1;
    }
    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;
    RNG_STATE.store(state, Ordering::Relaxed);
    state
}

/// Uniform-ish integer in `[lo, hi]` (inclusive). Returns `lo` when the
/// range is empty.
pub fn random_in(lo: i64, hi: i64) -> i64 {
    if hi <= lo {
        return lo;
    }
    let span = (hi - lo + 1) as u64;
    lo + (random_u64() % span) as i64
}

/// Port inside `range` for a new `adb forward`.
pub fn random_port(range: (u16, u16)) -> u16 {
    random_in(range.0 as i64, range.1 as i64) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_in_respects_bounds() {
        for _ in 0..1000 {
            let v = random_in(-3, 3);
            assert!((-3..=3).contains(&v));
        }
    }

    #[test]
    fn empty_range_returns_lo() {
        assert_eq!(random_in(5, 5), 5);
        assert_eq!(random_in(5, 2), 5);
    }
}
