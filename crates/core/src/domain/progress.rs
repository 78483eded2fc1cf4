// Progress Marker - `Delay: <ticks>` reported by the acquisition executable

use serde::{Deserialize, Serialize};

/// Literal prefix of the marker
pub const DELAY_MARKER: &str = "Delay:";

/// FPGA clock period (125 MHz)
pub const TICK_PERIOD_NS: f64 = 8.0;

/// Distance between the two probes timed by the delay counter
pub const PROBE_SPACING_M: f64 = 0.30;

/// Decoded pulse delay, in FPGA clock ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub ticks: u64,
}

impl Progress {
    pub fn new(ticks: u64) -> Self {
        Self { ticks }
    }

    /// Delay in microseconds
    pub fn delay_us(&self) -> f64 {
        self.ticks as f64 * TICK_PERIOD_NS / 1000.0
    }

    /// Front velocity between the probes; `None` for a zero delay
    pub fn velocity_m_per_s(&self) -> Option<f64> {
        if self.ticks == 0 {
            return None;
        }
        Some(PROBE_SPACING_M / (self.ticks as f64 * TICK_PERIOD_NS * 1e-9))
    }
}

/// Find the first `Delay:` marker followed by whitespace and a decimal
/// integer.
///
/// Occurrences of the prefix that are not followed by the full pattern are
/// skipped. A digit run that overflows `u64` does not count as a match.
pub fn parse_delay(text: &str) -> Option<Progress> {
    let mut rest = text;

    while let Some(pos) = rest.find(DELAY_MARKER) {
        let after = &rest[pos + DELAY_MARKER.len()..];
        if let Some(ticks) = parse_marker_value(after) {
            return Some(Progress::new(ticks));
        }
        rest = after;
    }

    None
}

fn parse_marker_value(after: &str) -> Option<u64> {
    let digits = after.trim_start_matches(|c: char| c.is_ascii_whitespace());
    if digits.len() == after.len() {
        // At least one whitespace character is required
        return None;
    }

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    digits[..end].parse::<u64>().ok()
}
