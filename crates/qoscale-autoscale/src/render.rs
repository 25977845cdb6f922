//! Config rendering — turns computed limits into shaping-config text.
//!
//! The controller only depends on the [`Renderer`] trait and the
//! [`RenderContext`] contract. [`PlaceholderRenderer`] is the default
//! implementation: it substitutes `{{ fieldName }}` placeholders.

use std::path::Path;

use chrono::{DateTime, Local};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use qoscale_core::RateLimit;

/// Timestamp format written into rendered configs.
const TIMESTAMP_FORMAT: &str = "%a %b %d %Y %H:%M:%S %z";

/// Errors from rendering a template.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("template references undefined field `{0}`")]
    UndefinedField(String),

    #[error("malformed template at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    #[error("failed to read template {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("renderer failure: {0}")]
    Internal(String),
}

/// Values available to a template for one run.
///
/// Field names as seen by templates are the camelCase serde names:
/// `upLimit`, `downLimit`, `upLimitKbit`, `downLimitKbit`, `timestamp`,
/// `templatePath`, `outputPath`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderContext {
    up_limit: String,
    down_limit: String,
    up_limit_kbit: f64,
    down_limit_kbit: f64,
    timestamp: String,
    template_path: String,
    output_path: String,
}

impl RenderContext {
    pub fn new(
        up: &RateLimit,
        down: &RateLimit,
        at: DateTime<Local>,
        template_path: &Path,
        output_path: &Path,
    ) -> Self {
        Self {
            up_limit: up.formatted(),
            down_limit: down.formatted(),
            up_limit_kbit: up.value,
            down_limit_kbit: down.value,
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
            template_path: template_path.display().to_string(),
            output_path: output_path.display().to_string(),
        }
    }

    pub fn up_limit(&self) -> &str {
        &self.up_limit
    }

    pub fn down_limit(&self) -> &str {
        &self.down_limit
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Look up a field by its template name.
    pub fn field(&self, name: &str) -> Option<String> {
        let value = match name {
            "upLimit" => self.up_limit.clone(),
            "downLimit" => self.down_limit.clone(),
            "upLimitKbit" => self.up_limit_kbit.to_string(),
            "downLimitKbit" => self.down_limit_kbit.to_string(),
            "timestamp" => self.timestamp.clone(),
            "templatePath" => self.template_path.clone(),
            "outputPath" => self.output_path.clone(),
            _ => return None,
        };
        Some(value)
    }
}

/// Produces config text from a template source and a context.
pub trait Renderer: Send + Sync {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError>;
}

/// `{{ name }}` substitution over [`RenderContext::field`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl Renderer for PlaceholderRenderer {
    fn render(&self, template: &str, context: &RenderContext) -> Result<String, RenderError> {
        let placeholder = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
            .map_err(|e| RenderError::Internal(e.to_string()))?;

        let mut out = String::with_capacity(template.len());
        let mut last = 0;

        for caps in placeholder.captures_iter(template) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };

            let literal = &template[last..whole.start()];
            check_literal(literal, last)?;
            out.push_str(literal);

            let value = context
                .field(name.as_str())
                .ok_or_else(|| RenderError::UndefinedField(name.as_str().to_string()))?;
            out.push_str(&value);

            last = whole.end();
        }

        let tail = &template[last..];
        check_literal(tail, last)?;
        out.push_str(tail);

        Ok(out)
    }
}

/// Text between placeholders must not open another one.
fn check_literal(literal: &str, base: usize) -> Result<(), RenderError> {
    match literal.find("{{") {
        Some(pos) => Err(RenderError::Malformed {
            offset: base + pos,
            reason: "unterminated or invalid placeholder".to_string(),
        }),
        None => Ok(()),
    }
}

/// Read the template source from disk.
pub async fn load_template(path: &Path) -> Result<String, RenderError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RenderError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limit(value: f64) -> RateLimit {
        RateLimit {
            smoothed: value,
            scaled: value,
            floor: 0.0,
            value,
        }
    }

    fn context() -> RenderContext {
        let at = Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).single().unwrap();
        RenderContext::new(
            &limit(1487.5),
            &limit(21250.0),
            at,
            Path::new("/etc/qoscale/fireqos.conf.tmpl"),
            Path::new("/usr/local/etc/firehol/fireqos.conf"),
        )
    }

    #[test]
    fn substitutes_fields() {
        let template = "# generated {{ timestamp }} from {{templatePath}}\n\
                        interface eth0 world-in input rate {{ downLimit }}\n\
                        interface eth0 world-out output rate {{ upLimit }}\n";
        let out = PlaceholderRenderer.render(template, &context()).unwrap();

        assert!(out.contains("input rate 21250kbit\n"));
        assert!(out.contains("output rate 1488kbit\n"));
        assert!(out.contains("from /etc/qoscale/fireqos.conf.tmpl"));
        assert!(out.starts_with("# generated Fri Mar 01 2024 12:30:00"));
    }

    #[test]
    fn raw_values_are_available() {
        let out = PlaceholderRenderer
            .render("{{upLimitKbit}}/{{downLimitKbit}}", &context())
            .unwrap();
        assert_eq!(out, "1487.5/21250");
    }

    #[test]
    fn undefined_field_is_an_error() {
        let err = PlaceholderRenderer
            .render("rate {{ upLmit }}", &context())
            .unwrap_err();
        assert_eq!(err, RenderError::UndefinedField("upLmit".to_string()));
    }

    #[test]
    fn unterminated_placeholder_is_malformed() {
        let err = PlaceholderRenderer
            .render("ok {{ upLimit }} then {{ downLimit", &context())
            .unwrap_err();
        assert!(matches!(err, RenderError::Malformed { offset: 22, .. }));
    }

    #[test]
    fn template_without_placeholders_passes_through() {
        let out = PlaceholderRenderer.render("static\n", &context()).unwrap();
        assert_eq!(out, "static\n");
    }

    #[test]
    fn context_serializes_with_template_names() {
        let value = serde_json::to_value(context()).unwrap();
        assert_eq!(value["upLimit"], "1488kbit");
        assert_eq!(value["downLimitKbit"], 21250.0);
        assert_eq!(value["outputPath"], "/usr/local/etc/firehol/fireqos.conf");
    }

    #[tokio::test]
    async fn missing_template_file_is_read_error() {
        let err = load_template(Path::new("/nonexistent/qoscale.tmpl"))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Read { .. }));
    }
}
