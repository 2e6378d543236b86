use crate::capture::Keystroke;
use crate::util::{mean, round1};
use itertools::Itertools;

/// Live aggregate statistics over the accumulating sample. Dwell is how long
/// keys are held down; flight is the gap between releasing one key and
/// pressing the next. All three fields are zero until at least two
/// keystrokes exist.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LiveMetrics {
    /// Mean hold duration, rounded to the nearest millisecond.
    pub dwell_ms: f64,
    /// Mean release-to-next-press gap, rounded to the nearest millisecond.
    pub flight_ms: f64,
    /// Keystrokes per second over the sample span, one decimal place.
    pub keys_per_sec: f64,
}

impl LiveMetrics {
    /// Recompute from the full keystroke sequence. Pure; tolerates sequences
    /// of length 0 or 1 by returning all zeros.
    pub fn of(keystrokes: &[Keystroke]) -> Self {
        if keystrokes.len() < 2 {
            return Self::default();
        }

        let dwells: Vec<f64> = keystrokes
            .iter()
            .map(|k| k.release_time - k.press_time)
            .collect();
        let dwell_ms = mean(&dwells).unwrap_or(0.0).round();

        let flights: Vec<f64> = keystrokes
            .iter()
            .tuple_windows()
            .map(|(prev, next)| next.press_time - prev.release_time)
            .collect();
        let flight_ms = mean(&flights).unwrap_or(0.0).round();

        let first = &keystrokes[0];
        let last = &keystrokes[keystrokes.len() - 1];
        let elapsed_secs = (last.release_time - first.press_time) / 1000.0;
        let keys_per_sec = if elapsed_secs > 0.0 {
            round1(keystrokes.len() as f64 / elapsed_secs)
        } else {
            0.0
        };

        Self {
            dwell_ms,
            flight_ms,
            keys_per_sec,
        }
    }
}
