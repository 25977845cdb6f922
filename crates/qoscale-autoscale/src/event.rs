//! Lifecycle events emitted by the autoscale controller.

use std::path::PathBuf;

use serde::Serialize;

use qoscale_core::RateLimit;

use crate::error::TickStage;

/// Progress notifications for one tick, in emission order.
///
/// Delivered over a broadcast channel; see
/// [`AutoscaleController::subscribe`](crate::AutoscaleController::subscribe).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AutoscaleEvent {
    TickStarted {
        tick: u64,
    },
    /// A tick arrived while another was still running.
    TickSkipped,
    ServiceStopped {
        was_active: bool,
    },
    MeasurementStarted,
    MeasurementCompleted {
        download_bps: f64,
        upload_bps: f64,
    },
    MeasurementFailed {
        error: String,
    },
    LimitsComputed {
        up: RateLimit,
        down: RateLimit,
    },
    ConfigWritten {
        path: PathBuf,
    },
    HistoryLogFailed {
        error: String,
    },
    ServiceStarted,
    /// The service was started again on its previous config after a failed tick.
    ServiceRestored,
    ServiceRestoreFailed {
        error: String,
    },
    TickFailed {
        tick: u64,
        stage: TickStage,
        error: String,
    },
    TickCompleted {
        tick: u64,
        up_limit: String,
        down_limit: String,
    },
}
