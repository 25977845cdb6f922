//! Shaping service control.
//!
//! [`ServiceController`] is the seam the autoscaler drives; [`Systemctl`]
//! implements it for a systemd unit.

use std::process::Output;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors from controlling the shaping service.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("service manager unreachable: {0}")]
    Unreachable(String),

    #[error("unknown service unit `{0}`")]
    UnknownUnit(String),

    #[error("`{command}` failed (exit code {code}): {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },
}

/// Start/stop/restart/status operations against the shaping service.
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn start(&self) -> Result<(), ServiceError>;
    async fn stop(&self) -> Result<(), ServiceError>;
    async fn restart(&self) -> Result<(), ServiceError>;
    async fn is_active(&self) -> Result<bool, ServiceError>;
}

/// Controls a systemd unit through the `systemctl` binary.
#[derive(Debug, Clone)]
pub struct Systemctl {
    unit: String,
    program: String,
}

impl Systemctl {
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            program: "systemctl".to_string(),
        }
    }

    /// Use a different binary in place of `systemctl`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    async fn exec(&self, verb: &str) -> Result<Output, ServiceError> {
        debug!(program = %self.program, verb, unit = %self.unit, "invoking service manager");
        Command::new(&self.program)
            .arg(verb)
            .arg(&self.unit)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ServiceError::Unreachable(format!("{}: {e}", self.program)))
    }

    async fn run(&self, verb: &str) -> Result<(), ServiceError> {
        let output = self.exec(verb).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if stderr.contains("not found") || stderr.contains("not loaded") {
            return Err(ServiceError::UnknownUnit(self.unit.clone()));
        }

        Err(ServiceError::Command {
            command: format!("{} {verb} {}", self.program, self.unit),
            code: output.status.code().unwrap_or(-1),
            stderr,
        })
    }
}

#[async_trait]
impl ServiceController for Systemctl {
    async fn start(&self) -> Result<(), ServiceError> {
        self.run("start").await
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.run("stop").await
    }

    async fn restart(&self) -> Result<(), ServiceError> {
        self.run("restart").await
    }

    async fn is_active(&self) -> Result<bool, ServiceError> {
        let output = self.exec("is-active").await?;
        if output.status.success() {
            return Ok(true);
        }

        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        parse_active_state(&state, &self.unit)
    }
}

/// Interpret the state printed by a non-zero `systemctl is-active`.
fn parse_active_state(state: &str, unit: &str) -> Result<bool, ServiceError> {
    match state {
        // Starting or reloading units may already be shaping; stop them.
        "activating" | "reloading" => Ok(true),
        "inactive" | "failed" | "deactivating" => Ok(false),
        "unknown" => Err(ServiceError::UnknownUnit(unit.to_string())),
        other => Err(ServiceError::Command {
            command: format!("systemctl is-active {unit}"),
            code: 3,
            stderr: format!("unexpected state `{other}`"),
        }),
    }
}
