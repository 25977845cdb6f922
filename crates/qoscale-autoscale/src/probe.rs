//! Throughput measurement.
//!
//! [`ThroughputProbe`] is the measurement seam. [`CommandProbe`] runs an
//! external speed test (by default `speedtest-cli --json`) and reads the
//! `download` and `upload` bit rates from its JSON output.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use qoscale_core::Throughput;

/// Errors from a measurement attempt.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeasurementError {
    #[error("measurement timed out after {0:?}")]
    Timeout(Duration),

    #[error("measurement provider failed: {0}")]
    Provider(String),
}

/// Measures current download and upload throughput.
#[async_trait]
pub trait ThroughputProbe: Send + Sync {
    /// Measure, giving up after `timeout`.
    async fn measure(&self, timeout: Duration) -> Result<Throughput, MeasurementError>;
}

/// Runs a speed-test command and parses its JSON report.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from an argv-style command line. `None` if it is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone(), args.to_vec()))
    }
}

#[async_trait]
impl ThroughputProbe for CommandProbe {
    async fn measure(&self, timeout: Duration) -> Result<Throughput, MeasurementError> {
        debug!(program = %self.program, args = ?self.args, ?timeout, "running speed test");

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MeasurementError::Provider(format!("failed to run {}: {e}", self.program)))?;

        // Dropping the child on timeout kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| MeasurementError::Timeout(timeout))?
            .map_err(|e| MeasurementError::Provider(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MeasurementError::Provider(format!(
                "{} exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        parse_report(&output.stdout)
    }
}

/// Extract bit rates from a speed-test JSON report.
pub fn parse_report(stdout: &[u8]) -> Result<Throughput, MeasurementError> {
    let report: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| MeasurementError::Provider(format!("invalid JSON report: {e}")))?;

    let field = |name: &str| {
        report
            .get(name)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| MeasurementError::Provider(format!("report has no numeric `{name}`")))
    };

    Ok(Throughput::new(field("download")?, field("upload")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_speedtest_cli_report() {
        let report = br#"{"download": 93456789.12, "upload": 11234567.8, "ping": 12.3,
                          "server": {"name": "Example"}}"#;
        let t = parse_report(report).unwrap();
        assert_eq!(t.download_bps, 93456789.12);
        assert_eq!(t.upload_bps, 11234567.8);
    }

    #[test]
    fn missing_field_is_provider_error() {
        let err = parse_report(br#"{"download": 1000}"#).unwrap_err();
        assert_eq!(
            err,
            MeasurementError::Provider("report has no numeric `upload`".to_string())
        );
    }

    #[test]
    fn garbage_is_provider_error() {
        assert!(matches!(
            parse_report(b"Retrieving speedtest.net configuration..."),
            Err(MeasurementError::Provider(_))
        ));
    }

    #[test]
    fn empty_argv_has_no_probe() {
        assert!(CommandProbe::from_argv(&[]).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_command_output() {
        let probe = CommandProbe::new(
            "echo",
            vec![r#"{"download": 2000000, "upload": 500000}"#.to_string()],
        );
        let t = probe.measure(Duration::from_secs(5)).await.unwrap();
        assert_eq!(t, Throughput::new(2_000_000.0, 500_000.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_command_times_out() {
        let probe = CommandProbe::new("sleep", vec!["5".to_string()]);
        let err = probe.measure(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, MeasurementError::Timeout(Duration::from_millis(50)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_provider_error() {
        let probe = CommandProbe::new("false", vec![]);
        assert!(matches!(
            probe.measure(Duration::from_secs(5)).await,
            Err(MeasurementError::Provider(_))
        ));
    }
}
