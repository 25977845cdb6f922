//! Rate limit derivation.
//!
//! ```text
//! smoothed = history.record(measurement)
//! limit    = max(smoothed * scale, floor)
//! ```
//!
//! Measurements are validated before they reach the history, so a bad
//! sample can never skew later averages.

use thiserror::Error;

use qoscale_core::{DirectionConfig, RateLimit};

use crate::history::{HistoryError, SampleHistory};

/// Rejected measurement.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LimitError {
    #[error("measurement must be finite (got {0})")]
    NonFinite(f64),

    #[error("measurement must not be negative (got {0})")]
    Negative(f64),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Check that `measurement` is usable before it is recorded anywhere.
pub fn validate_measurement(measurement: f64) -> Result<(), LimitError> {
    if !measurement.is_finite() {
        return Err(LimitError::NonFinite(measurement));
    }
    if measurement < 0.0 {
        return Err(LimitError::Negative(measurement));
    }
    Ok(())
}

/// Record `measurement` (kbit/s) into `history` and derive a limit.
pub fn compute_limit(
    measurement: f64,
    history: &mut SampleHistory,
    scale: f64,
    floor: f64,
) -> Result<RateLimit, LimitError> {
    validate_measurement(measurement)?;

    let smoothed = history.record(measurement)?;
    let scaled = smoothed * scale;

    Ok(RateLimit {
        smoothed,
        scaled,
        floor,
        value: scaled.max(floor),
    })
}

/// [`compute_limit`] with a direction's configured scale and floor.
pub fn compute_direction_limit(
    measurement: f64,
    history: &mut SampleHistory,
    config: DirectionConfig,
) -> Result<RateLimit, LimitError> {
    compute_limit(measurement, history, config.scale, config.floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_smoothed_average() {
        let mut history = SampleHistory::new(4, 4);
        for sample in [1000.0, 1000.0, 1000.0] {
            compute_limit(sample, &mut history, 0.85, 500.0).unwrap();
        }

        let limit = compute_limit(4000.0, &mut history, 0.85, 500.0).unwrap();
        assert_eq!(limit.smoothed, 1750.0);
        assert_eq!(limit.value, 1487.5);
        assert_eq!(limit.formatted(), "1488kbit");
        assert!(!limit.is_floored());
    }

    #[test]
    fn floor_wins_for_slow_links() {
        let mut history = SampleHistory::new(4, 4);
        let limit = compute_limit(200.0, &mut history, 0.95, 500.0).unwrap();
        assert_eq!(limit.value, 500.0);
        assert!(limit.is_floored());
    }

    #[test]
    fn never_below_floor_and_monotonic_in_measurement() {
        let floor = 750.0;
        let mut previous = f64::MIN;
        for step in 0..200 {
            let measurement = step as f64 * 25.0;
            // Fresh history so only the measurement varies.
            let mut history = SampleHistory::new(4, 4);
            let limit = compute_limit(measurement, &mut history, 0.9, floor).unwrap();
            assert!(limit.value >= floor);
            assert!(limit.value >= previous);
            previous = limit.value;
        }
    }

    #[test]
    fn invalid_measurements_do_not_touch_history() {
        let mut history = SampleHistory::new(4, 4);
        history.record(1000.0).unwrap();

        assert_eq!(
            compute_limit(-1.0, &mut history, 0.9, 0.0),
            Err(LimitError::Negative(-1.0))
        );
        assert!(matches!(
            compute_limit(f64::NAN, &mut history, 0.9, 0.0),
            Err(LimitError::NonFinite(_))
        ));
        assert_eq!(history.entries().collect::<Vec<_>>(), vec![1000.0]);
    }

    #[test]
    fn directions_keep_separate_state() {
        let mut up = SampleHistory::new(4, 4);
        let mut down = SampleHistory::new(4, 4);
        let up_cfg = DirectionConfig { scale: 0.95, floor: 100.0 };
        let down_cfg = DirectionConfig { scale: 0.85, floor: 100.0 };

        compute_direction_limit(1000.0, &mut up, up_cfg).unwrap();
        let down_limit = compute_direction_limit(20000.0, &mut down, down_cfg).unwrap();
        let up_limit = compute_direction_limit(1000.0, &mut up, up_cfg).unwrap();

        assert_eq!(down_limit.value, 17000.0);
        assert_eq!(up_limit.value, 950.0);
        assert_eq!(up.len(), 2);
        assert_eq!(down.len(), 1);
    }
}
