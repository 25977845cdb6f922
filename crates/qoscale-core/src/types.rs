//! Shared types used across qoscale crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bits per kilobit. Measurements arrive in bit/s; limits are kbit/s.
pub const BITS_PER_KBIT: f64 = 1000.0;

/// Unit suffix appended to rendered rates.
pub const RATE_UNIT: &str = "kbit";

/// Traffic direction. Each direction has its own history and parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Raw result of one throughput measurement, in bits per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Throughput {
    pub download_bps: f64,
    pub upload_bps: f64,
}

impl Throughput {
    pub fn new(download_bps: f64, upload_bps: f64) -> Self {
        Self {
            download_bps,
            upload_bps,
        }
    }

    /// Measured rate for `direction`, converted to kbit/s.
    pub fn kbit(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Up => self.upload_bps / BITS_PER_KBIT,
            Direction::Down => self.download_bps / BITS_PER_KBIT,
        }
    }
}

/// A rate limit derived from one measurement, in kbit/s.
///
/// `value` is what gets configured: `max(scaled, floor)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Trailing-window average after recording the measurement.
    pub smoothed: f64,
    /// `smoothed * scale`.
    pub scaled: f64,
    /// Configured minimum.
    pub floor: f64,
    /// Final limit.
    pub value: f64,
}

impl RateLimit {
    /// Whether the floor, rather than the measurement, decided the limit.
    pub fn is_floored(&self) -> bool {
        self.scaled < self.floor
    }

    /// Rounded limit with unit suffix, e.g. `1488kbit`.
    pub fn formatted(&self) -> String {
        format_rate(self.value)
    }
}

/// Render a kbit/s value the way the shaping config expects it.
pub fn format_rate(kbit: f64) -> String {
    format!("{}{RATE_UNIT}", kbit.round() as i64)
}
