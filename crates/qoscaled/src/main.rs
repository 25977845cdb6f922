//! qoscaled — the qoscale daemon.
//!
//! Measures link throughput on a schedule, derives upload/download limits
//! from a trailing average, renders them into the FireQOS config and
//! restarts the shaping service.
//!
//! # Usage
//!
//! ```text
//! qoscaled -t /etc/qoscale/fireqos.conf.tmpl -f 15m --down-scale 0.85
//! qoscaled --config /etc/qoscale/qoscale.toml --once
//! ```

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use qoscale_autoscale::{
    AutoscaleController, AutoscaleEvent, CommandProbe, PlaceholderRenderer, Systemctl,
};
use qoscale_core::AutoscalerConfig;

mod cli;

use cli::{Cli, LogFormat};

const DEFAULT_FILTER: &str = "info,qoscale=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = AutoscalerConfig::new(cli.options()?).context("invalid configuration")?;
    let probe = CommandProbe::from_argv(config.measure_command())
        .context("measure command is empty")?;
    let service = Systemctl::new(config.service());

    info!(
        template = %config.template().display(),
        output = %config.output().display(),
        service = %config.service(),
        "qoscaled starting"
    );

    let controller = Arc::new(AutoscaleController::new(
        config,
        Arc::new(probe),
        Arc::new(PlaceholderRenderer),
        Arc::new(service),
    ));
    let events = tokio::spawn(log_events(controller.subscribe()));

    if cli.once {
        let result = controller.autoscale_once().await;
        // Closing the event channel lets the logger drain what is buffered.
        drop(controller);
        let _ = events.await;
        result.context("autoscale tick failed")?;
        return Ok(());
    }

    // Stopping from the signal task leaves an in-flight tick to finish.
    let (stopped_tx, stopped_rx) = oneshot::channel();
    tokio::spawn({
        let controller = Arc::clone(&controller);
        async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            controller.stop();
            let _ = stopped_tx.send(());
        }
    });

    controller.start().await;
    let _ = stopped_rx.await;
    controller.shutdown().await;
    drop(controller);
    let _ = events.await;

    info!("qoscaled stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Log controller progress until the channel closes.
///
/// Failures are already logged by the controller; they only get a debug line here.
async fn log_events(mut events: broadcast::Receiver<AutoscaleEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "event log fell behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            AutoscaleEvent::TickStarted { tick } => debug!(tick, "tick started"),
            AutoscaleEvent::TickSkipped => debug!("tick skipped"),
            AutoscaleEvent::ServiceStopped { was_active } => {
                debug!(was_active, "shaping service stopped")
            }
            AutoscaleEvent::MeasurementStarted => info!("speed test started"),
            AutoscaleEvent::MeasurementCompleted {
                download_bps,
                upload_bps,
            } => info!(download_bps, upload_bps, "speed test completed"),
            AutoscaleEvent::MeasurementFailed { error } => debug!(%error, "speed test failed"),
            AutoscaleEvent::LimitsComputed { up, down } => info!(
                up = %up.formatted(),
                down = %down.formatted(),
                up_floored = up.is_floored(),
                down_floored = down.is_floored(),
                "limits computed"
            ),
            AutoscaleEvent::ConfigWritten { path } => {
                debug!(path = %path.display(), "config written")
            }
            AutoscaleEvent::HistoryLogFailed { error } => debug!(%error, "history log append failed"),
            AutoscaleEvent::ServiceStarted => debug!("shaping service started"),
            AutoscaleEvent::ServiceRestored => debug!("shaping service restored"),
            AutoscaleEvent::ServiceRestoreFailed { error } => {
                debug!(%error, "shaping service restore failed")
            }
            AutoscaleEvent::TickFailed { tick, stage, error } => {
                debug!(tick, %stage, %error, "tick failed")
            }
            AutoscaleEvent::TickCompleted {
                tick,
                up_limit,
                down_limit,
            } => debug!(tick, %up_limit, %down_limit, "tick completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_FILTER.parse::<tracing_subscriber::EnvFilter>().is_ok());
    }

    #[tokio::test]
    async fn event_logger_drains_buffer_then_exits_on_close() {
        let (tx, rx) = broadcast::channel(16);
        tx.send(AutoscaleEvent::MeasurementStarted).unwrap();
        tx.send(AutoscaleEvent::TickStarted { tick: 1 }).unwrap();
        drop(tx);

        let logger = tokio::spawn(log_events(rx));
        tokio::time::timeout(std::time::Duration::from_secs(5), logger)
            .await
            .expect("logger should exit once the channel closes")
            .unwrap();
    }
}
