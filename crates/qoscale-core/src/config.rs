//! Autoscaler configuration: raw options and the validated config.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;
use crate::types::Direction;

/// Shortest allowed interval between autoscale runs.
pub const MIN_FREQUENCY: Duration = Duration::from_secs(60);

/// Default FireQOS configuration path.
pub const DEFAULT_OUTPUT: &str = "/usr/local/etc/firehol/fireqos.conf";

/// Raw autoscaler options as read from a config file or the command line.
///
/// Unvalidated. Turn into an [`AutoscalerConfig`] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoscalerOptions {
    /// Fraction of measured upload bandwidth to allow.
    pub up_scale: f64,
    /// Fraction of measured download bandwidth to allow.
    pub down_scale: f64,
    /// Minimum upload limit (kbit/s).
    pub min_up: f64,
    /// Minimum download limit (kbit/s).
    pub min_down: f64,
    /// Number of most recent samples averaged per run.
    pub window: usize,
    /// Samples retained per direction.
    pub max_entries: usize,
    #[serde(with = "humantime_serde")]
    pub frequency: Duration,
    #[serde(with = "humantime_serde")]
    pub measure_timeout: Duration,
    pub template: Option<PathBuf>,
    pub output: PathBuf,
    /// Service unit restarted to apply the rendered config.
    pub service: String,
    /// Command whose JSON output reports `download` and `upload` in bit/s.
    pub measure_command: Vec<String>,
    /// Optional JSON-lines audit log of every applied measurement.
    pub history_log: Option<PathBuf>,
}

impl Default for AutoscalerOptions {
    fn default() -> Self {
        Self {
            up_scale: 0.95,
            down_scale: 0.85,
            min_up: 500.0,
            min_down: 500.0,
            window: 4,
            max_entries: 48,
            frequency: Duration::from_secs(15 * 60),
            measure_timeout: Duration::from_secs(10),
            template: None,
            output: PathBuf::from(DEFAULT_OUTPUT),
            service: "fireqos".to_string(),
            measure_command: vec![
                "speedtest-cli".to_string(),
                "--json".to_string(),
                "--secure".to_string(),
            ],
            history_log: None,
        }
    }
}

impl AutoscalerOptions {
    /// Defaults with the given template path.
    pub fn with_template(template: impl Into<PathBuf>) -> Self {
        Self {
            template: Some(template.into()),
            ..Default::default()
        }
    }

    /// Load options from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }
}

/// Scale and floor for one direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectionConfig {
    /// In (0, 1].
    pub scale: f64,
    /// kbit/s, finite and non-negative.
    pub floor: f64,
}

/// Validated, immutable autoscaler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalerConfig {
    up: DirectionConfig,
    down: DirectionConfig,
    window: usize,
    max_entries: usize,
    frequency: Duration,
    measure_timeout: Duration,
    template: PathBuf,
    output: PathBuf,
    service: String,
    measure_command: Vec<String>,
    history_log: Option<PathBuf>,
}

impl AutoscalerConfig {
    /// Validate `options`, reporting every problem at once.
    pub fn new(options: AutoscalerOptions) -> Result<Self, ConfigError> {
        let mut errors = Vec::new();

        let template = match options.template {
            Some(ref t) if !t.as_os_str().is_empty() => Some(t.clone()),
            _ => {
                errors.push("template is required".to_string());
                None
            }
        };

        if options.frequency < MIN_FREQUENCY {
            errors.push(format!(
                "frequency must be {} or greater (got {})",
                humantime::format_duration(MIN_FREQUENCY),
                humantime::format_duration(options.frequency),
            ));
        }

        check_scale(&mut errors, "up_scale", options.up_scale);
        check_scale(&mut errors, "down_scale", options.down_scale);
        check_floor(&mut errors, "min_up", options.min_up);
        check_floor(&mut errors, "min_down", options.min_down);

        if options.window == 0 {
            errors.push("window must be at least 1".to_string());
        }
        if options.max_entries == 0 {
            errors.push("max_entries must be at least 1".to_string());
        }
        if options.measure_timeout.is_zero() {
            errors.push("measure_timeout must be greater than zero".to_string());
        }
        if options.measure_command.first().is_none_or(|c| c.trim().is_empty()) {
            errors.push("measure_command must name a program".to_string());
        }
        if options.service.trim().is_empty() {
            errors.push("service must not be empty".to_string());
        }
        if options.output.as_os_str().is_empty() {
            errors.push("output must not be empty".to_string());
        }

        let template = match template {
            Some(t) if errors.is_empty() => t,
            _ => return Err(ConfigError::Invalid(errors)),
        };

        if options.window > options.max_entries {
            warn!(
                window = options.window,
                max_entries = options.max_entries,
                "window exceeds max_entries; averaging over at most max_entries samples"
            );
        }

        Ok(Self {
            up: DirectionConfig {
                scale: options.up_scale,
                floor: options.min_up,
            },
            down: DirectionConfig {
                scale: options.down_scale,
                floor: options.min_down,
            },
            window: options.window,
            max_entries: options.max_entries,
            frequency: options.frequency,
            measure_timeout: options.measure_timeout,
            template,
            output: options.output,
            service: options.service,
            measure_command: options.measure_command,
            history_log: options.history_log,
        })
    }

    pub fn direction(&self, direction: Direction) -> DirectionConfig {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn frequency(&self) -> Duration {
        self.frequency
    }

    pub fn measure_timeout(&self) -> Duration {
        self.measure_timeout
    }

    pub fn template(&self) -> &Path {
        &self.template
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn measure_command(&self) -> &[String] {
        &self.measure_command
    }

    pub fn history_log(&self) -> Option<&Path> {
        self.history_log.as_deref()
    }
}

fn check_scale(errors: &mut Vec<String>, name: &str, value: f64) {
    if !(value > 0.0 && value <= 1.0) {
        errors.push(format!("{name} must be in (0, 1] (got {value})"));
    }
}

fn check_floor(errors: &mut Vec<String>, name: &str, value: f64) {
    if !value.is_finite() || value < 0.0 {
        errors.push(format!("{name} must be a non-negative number (got {value})"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_with_template_are_valid() {
        let config = AutoscalerConfig::new(AutoscalerOptions::with_template("fireqos.hbs")).unwrap();
        assert_eq!(config.window(), 4);
        assert_eq!(config.max_entries(), 48);
        assert_eq!(config.direction(Direction::Up).scale, 0.95);
        assert_eq!(config.direction(Direction::Down).scale, 0.85);
        assert_eq!(config.direction(Direction::Down).floor, 500.0);
        assert_eq!(config.output(), Path::new(DEFAULT_OUTPUT));
        assert_eq!(config.frequency(), Duration::from_secs(900));
    }

    #[test]
    fn missing_template_is_rejected() {
        let err = AutoscalerConfig::new(AutoscalerOptions::default()).unwrap_err();
        assert_eq!(err.problems(), ["template is required".to_string()]);
    }

    #[test]
    fn frequency_below_one_minute_is_rejected() {
        let options = AutoscalerOptions {
            frequency: Duration::from_secs(59),
            ..AutoscalerOptions::with_template("t.hbs")
        };
        let err = AutoscalerConfig::new(options).unwrap_err();
        assert_eq!(err.problems().len(), 1);
        assert!(err.problems()[0].starts_with("frequency must be 1m or greater"));
    }

    #[test]
    fn frequency_of_exactly_one_minute_is_accepted() {
        let options = AutoscalerOptions {
            frequency: MIN_FREQUENCY,
            ..AutoscalerOptions::with_template("t.hbs")
        };
        assert!(AutoscalerConfig::new(options).is_ok());
    }

    #[test]
    fn scale_fraction_bounds() {
        for bad in [0.0, -0.5, 1.01, f64::NAN] {
            let options = AutoscalerOptions {
                up_scale: bad,
                ..AutoscalerOptions::with_template("t.hbs")
            };
            assert!(AutoscalerConfig::new(options).is_err(), "accepted up_scale {bad}");
        }

        let options = AutoscalerOptions {
            up_scale: 1.0,
            down_scale: 0.01,
            ..AutoscalerOptions::with_template("t.hbs")
        };
        assert!(AutoscalerConfig::new(options).is_ok());
    }

    #[test]
    fn reports_all_problems_together() {
        let options = AutoscalerOptions {
            frequency: Duration::from_secs(1),
            down_scale: 2.0,
            min_up: f64::INFINITY,
            window: 0,
            ..AutoscalerOptions::default()
        };
        let err = AutoscalerConfig::new(options).unwrap_err();
        assert_eq!(err.problems().len(), 5);
        assert!(err.to_string().contains("template is required\n"));
    }

    #[test]
    fn window_larger_than_history_is_allowed() {
        let options = AutoscalerOptions {
            window: 10,
            max_entries: 4,
            ..AutoscalerOptions::with_template("t.hbs")
        };
        assert!(AutoscalerConfig::new(options).is_ok());
    }

    #[test]
    fn parse_toml_with_durations() {
        let options = AutoscalerOptions::from_toml_str(
            r#"
template = "/etc/qoscale/fireqos.conf.hbs"
frequency = "30m"
measure_timeout = "20s"
down_scale = 0.8
history_log = "/var/log/qoscale.jsonl"
"#,
        )
        .unwrap();
        assert_eq!(options.frequency, Duration::from_secs(1800));
        assert_eq!(options.measure_timeout, Duration::from_secs(20));
        assert_eq!(options.down_scale, 0.8);
        assert_eq!(options.up_scale, 0.95);
        assert_eq!(
            options.history_log.as_deref(),
            Some(Path::new("/var/log/qoscale.jsonl"))
        );
    }

    #[test]
    fn parse_rejects_unknown_keys() {
        let err = AutoscalerOptions::from_toml_str("upscale = 0.5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
