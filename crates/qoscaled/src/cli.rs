//! Command-line surface and option layering.
//!
//! Precedence: built-in defaults < `--config` file < explicit flags.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use qoscale_core::AutoscalerOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "qoscaled",
    about = "Adaptive bandwidth limits for FireQOS: measure, smooth, render, restart",
    version
)]
pub struct Cli {
    /// Path to the FireQOS configuration template file.
    #[arg(short, long)]
    pub template: Option<PathBuf>,

    /// FireQOS config file output path.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Speed test and update frequency (e.g. 15m, 1h).
    #[arg(short, long, value_parser = parse_duration)]
    pub frequency: Option<Duration>,

    /// Number of previous results to average in calculating speed limit.
    #[arg(short, long)]
    pub window: Option<usize>,

    /// Number of results kept per direction.
    #[arg(long)]
    pub max_entries: Option<usize>,

    /// Fraction of available upload bandwidth to use.
    #[arg(long)]
    pub up_scale: Option<f64>,

    /// Fraction of available download bandwidth to use.
    #[arg(long)]
    pub down_scale: Option<f64>,

    /// Minimum upload speed (kbit/s).
    #[arg(long)]
    pub min_up: Option<f64>,

    /// Minimum download speed (kbit/s).
    #[arg(long)]
    pub min_down: Option<f64>,

    /// Speed test timeout (e.g. 10s).
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Systemd unit of the shaping service.
    #[arg(long)]
    pub service: Option<String>,

    /// Speed test command line; must print JSON with `download` and `upload` in bit/s.
    #[arg(long)]
    pub measure_command: Option<String>,

    /// Append every applied measurement to this JSON-lines file.
    #[arg(long)]
    pub history_log: Option<PathBuf>,

    /// TOML file with any of the options above.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run a single autoscale tick and exit.
    #[arg(long)]
    pub once: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Merge the config file (if any) and explicit flags over the defaults.
    pub fn options(&self) -> anyhow::Result<AutoscalerOptions> {
        let mut options = match &self.config {
            Some(path) => AutoscalerOptions::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => AutoscalerOptions::default(),
        };

        if let Some(template) = &self.template {
            options.template = Some(template.clone());
        }
        if let Some(output) = &self.output {
            options.output = output.clone();
        }
        if let Some(frequency) = self.frequency {
            options.frequency = frequency;
        }
        if let Some(window) = self.window {
            options.window = window;
        }
        if let Some(max_entries) = self.max_entries {
            options.max_entries = max_entries;
        }
        if let Some(up_scale) = self.up_scale {
            options.up_scale = up_scale;
        }
        if let Some(down_scale) = self.down_scale {
            options.down_scale = down_scale;
        }
        if let Some(min_up) = self.min_up {
            options.min_up = min_up;
        }
        if let Some(min_down) = self.min_down {
            options.min_down = min_down;
        }
        if let Some(timeout) = self.timeout {
            options.measure_timeout = timeout;
        }
        if let Some(service) = &self.service {
            options.service = service.clone();
        }
        if let Some(command) = &self.measure_command {
            options.measure_command = command.split_whitespace().map(str::to_string).collect();
        }
        if let Some(history_log) = &self.history_log {
            options.history_log = Some(history_log.clone());
        }

        Ok(options)
    }
}

fn parse_duration(s: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}
