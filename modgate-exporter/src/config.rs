//! HTTP endpoint configuration.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9101").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for the metrics endpoint (default: "/metrics").
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,

    /// Metric name prefix (default: none).
    #[serde(default)]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:9101".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_path: default_metrics_path(),
            prefix: String::new(),
        }
    }
}

impl HttpConfig {
    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, String> {
        self.listen
            .parse()
            .map_err(|e| format!("Invalid listen address '{}': {}", self.listen, e))
    }

    /// Validate the settings, returning a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        self.listen_addr()?;

        if !self.metrics_path.starts_with('/') {
            return Err(format!(
                "Metrics path '{}' must start with /",
                self.metrics_path
            ));
        }

        if self.metrics_path == "/tags"
            || self.metrics_path == "/health"
            || self.metrics_path == "/ready"
            || self.metrics_path.starts_with("/api/")
        {
            return Err(format!(
                "Metrics path '{}' conflicts with a built-in route",
                self.metrics_path
            ));
        }

        Ok(())
    }
}
