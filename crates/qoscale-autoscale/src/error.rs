//! Per-tick error taxonomy.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use qoscale_core::Direction;

use crate::limit::LimitError;
use crate::output::OutputError;
use crate::probe::MeasurementError;
use crate::render::RenderError;
use crate::service::ServiceError;

/// Step of a tick at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStage {
    StopService,
    Measure,
    Compute,
    Render,
    Write,
    StartService,
}

impl fmt::Display for TickStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TickStage::StopService => "stop-service",
            TickStage::Measure => "measure",
            TickStage::Compute => "compute",
            TickStage::Render => "render",
            TickStage::Write => "write",
            TickStage::StartService => "start-service",
        };
        f.write_str(name)
    }
}

/// Why a tick was aborted. None of these stop the controller.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("service control failed during {stage}: {source}")]
    Service {
        stage: TickStage,
        #[source]
        source: ServiceError,
    },

    #[error(transparent)]
    Measurement(#[from] MeasurementError),

    #[error("rejected {direction} measurement: {source}")]
    Limit {
        direction: Direction,
        #[source]
        source: LimitError,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

impl TickError {
    pub(crate) fn service(stage: TickStage, source: ServiceError) -> Self {
        TickError::Service { stage, source }
    }

    pub fn stage(&self) -> TickStage {
        match self {
            TickError::Service { stage, .. } => *stage,
            TickError::Measurement(_) => TickStage::Measure,
            TickError::Limit { .. } => TickStage::Compute,
            TickError::Render(_) => TickStage::Render,
            TickError::Output(_) => TickStage::Write,
        }
    }

    /// Errors that will recur every tick until an operator fixes the setup.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            TickError::Render(_)
                | TickError::Service {
                    source: ServiceError::UnknownUnit(_),
                    ..
                }
        )
    }
}
