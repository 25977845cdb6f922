//! qoscale-autoscale — adaptive bandwidth limits for a traffic shaper.
//!
//! Periodically measures real throughput, smooths it over a bounded
//! history, derives conservative limits and applies them by rendering the
//! shaping config and restarting the shaping service.
//!
//! # Tick
//!
//! ```text
//! stop service
//!   → measure (bounded by timeout)
//!   → per direction: validate, record, average last `window`, × scale, max(floor)
//!   → render template → atomic write
//! start service
//! ```
//!
//! Any failure after the service was stopped aborts the tick and starts the
//! service again on its previous config, so the link is never left
//! unshaped by a bad measurement. The next tick proceeds normally.
//!
//! # Collaborators
//!
//! Measurement ([`ThroughputProbe`]), rendering ([`Renderer`]) and service
//! control ([`ServiceController`]) are traits; [`CommandProbe`],
//! [`PlaceholderRenderer`] and [`Systemctl`] are the default adapters.

pub mod controller;
pub mod error;
pub mod event;
pub mod history;
pub mod limit;
pub mod output;
pub mod probe;
pub mod render;
pub mod service;

pub use controller::{AppliedLimits, AutoscaleController, TickOutcome};
pub use error::{TickError, TickStage};
pub use event::AutoscaleEvent;
pub use history::{HistoryError, SampleHistory};
pub use limit::{compute_limit, LimitError};
pub use probe::{CommandProbe, MeasurementError, ThroughputProbe};
pub use render::{PlaceholderRenderer, RenderContext, RenderError, Renderer};
pub use service::{ServiceController, ServiceError, Systemctl};
