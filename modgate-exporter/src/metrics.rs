//! Prometheus text exposition of controller state.

use std::collections::HashMap;
use std::fmt::Write;

use modgate_controller::Controller;

/// Controller counters exported ahead of the tag gauges.
pub const BUILTIN_METRICS: [&str; 3] = ["req_counter", "err_counter", "fail_attempts"];

/// Renders tag gauges and controller counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsRenderer {
    prefix: String,
}

impl MetricsRenderer {
    /// Create a renderer. An empty prefix leaves metric names unchanged.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Full metric name for a raw name.
    pub fn metric_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            sanitize_metric_name(name)
        } else {
            sanitize_metric_name(&format!("{}_{}", self.prefix, name))
        }
    }

    /// Check that every tag gets its own metric name.
    ///
    /// Sanitizing can fold distinct tag names together, and a tag may land on
    /// one of [`BUILTIN_METRICS`].
    pub fn check_names<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Result<(), String> {
        // `None` marks a built-in counter.
        let mut seen: HashMap<String, Option<&str>> = BUILTIN_METRICS
            .iter()
            .map(|builtin| (self.metric_name(builtin), None))
            .collect();

        for name in names {
            let metric = self.metric_name(name);
            match seen.insert(metric.clone(), Some(name)) {
                None => {}
                Some(None) => {
                    return Err(format!(
                        "Tag '{}' clashes with built-in metric '{}'",
                        name, metric
                    ));
                }
                Some(Some(other)) => {
                    return Err(format!(
                        "Tags '{}' and '{}' both export metric '{}'",
                        other, name, metric
                    ));
                }
            }
        }

        Ok(())
    }

    /// Render everything in text format 0.0.4.
    pub fn render(&self, controller: &Controller) -> String {
        let mut output = String::new();

        self.write_metric(
            &mut output,
            "req_counter",
            "counter",
            "Total read requests issued to the device",
            controller.requests() as f64,
        );
        self.write_metric(
            &mut output,
            "err_counter",
            "counter",
            "Total failed read requests",
            controller.errors() as f64,
        );
        self.write_metric(
            &mut output,
            "fail_attempts",
            "gauge",
            "Reconnects since the last successful read",
            f64::from(controller.fail_attempts()),
        );

        for snapshot in controller.tags() {
            self.write_metric(
                &mut output,
                snapshot.tag.name(),
                "gauge",
                snapshot.tag.label(),
                snapshot.gauge(),
            );
        }

        output
    }

    fn write_metric(&self, output: &mut String, name: &str, kind: &str, help: &str, value: f64) {
        let name = self.metric_name(name);
        let _ = writeln!(output, "# HELP {} {}", name, escape_help(help));
        let _ = writeln!(output, "# TYPE {} {}", name, kind);
        let _ = writeln!(output, "{} {}", name, format_value(value));
    }
}

/// Sanitize a name to match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
///
/// Invalid characters become underscores, runs of underscores collapse, and
/// a leading digit gets an underscore prefix.
pub fn sanitize_metric_name(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 1);
    let mut last_was_underscore = false;

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        result.push('_');
        last_was_underscore = true;
    }

    for c in name.chars() {
        let c = if c.is_ascii_alphanumeric() || c == ':' {
            c
        } else {
            '_'
        };

        if c == '_' {
            if !last_was_underscore {
                result.push(c);
            }
            last_was_underscore = true;
        } else {
            result.push(c);
            last_was_underscore = false;
        }
    }

    while result.len() > 1 && result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        result.push('_');
    }

    result
}

/// Escape HELP text (backslash and newline).
fn escape_help(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Format a floating point value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}
