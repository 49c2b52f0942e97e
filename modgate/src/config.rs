//! Gateway configuration file.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use modgate_common::LoggingConfig;
use modgate_controller::{
    ControllerConfig, Endpoint, ModbusSettings, Operation, Parity, SerialSettings, Tag, TagError,
};
use modgate_exporter::{HttpConfig, MetricsRenderer};
use modgate_telegram::TelegramConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Device URL used when neither the file nor the command line sets one.
pub const DEFAULT_DEVICE_URL: &str = "rtuovertcp://192.168.1.200:8899";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Tag '{name}': {source}")]
    Tag {
        name: String,
        #[source]
        source: TagError,
    },
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Device connection and polling settings.
    #[serde(default)]
    pub device: DeviceConfig,

    /// Polled tags, in polling order.
    pub tags: Vec<TagConfig>,

    /// HTTP endpoints.
    #[serde(default)]
    pub http: HttpConfig,

    /// Telegram bot (disabled when absent).
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Device connection and polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// `tcp://host:port`, `rtuovertcp://host:port` or `rtu:///dev/ttyX`.
    /// Empty means "use the command line".
    #[serde(default)]
    pub url: String,

    /// Modbus unit id (default: 16).
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Serial baud rate (default: 19200).
    #[serde(default = "default_speed")]
    pub speed: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default)]
    pub parity: Parity,

    /// Stop bits (default: 2 without parity, 1 with).
    #[serde(default)]
    pub stop_bits: Option<u8>,

    /// Connect and request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Pause between polling cycles in milliseconds.
    #[serde(default = "default_polling_ms")]
    pub polling_ms: u64,

    /// Pause before each tag read in milliseconds.
    #[serde(default = "default_read_period_ms")]
    pub read_period_ms: u64,

    /// Pause after a failed read in milliseconds.
    #[serde(default = "default_err_timeout_ms")]
    pub err_timeout_ms: u64,

    /// Consecutive reconnects without a good read before exiting.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_unit_id() -> u8 {
    16
}

fn default_speed() -> u32 {
    19200
}

fn default_data_bits() -> u8 {
    8
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_polling_ms() -> u64 {
    1000
}

fn default_read_period_ms() -> u64 {
    20
}

fn default_err_timeout_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    20
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            unit_id: default_unit_id(),
            speed: default_speed(),
            data_bits: default_data_bits(),
            parity: Parity::default(),
            stop_bits: None,
            timeout_ms: default_timeout_ms(),
            polling_ms: default_polling_ms(),
            read_period_ms: default_read_period_ms(),
            err_timeout_ms: default_err_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl DeviceConfig {
    /// Device URL, falling back to `fallback` when unset.
    pub fn url_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.url.trim().is_empty() {
            fallback
        } else {
            self.url.trim()
        }
    }

    pub fn serial(&self) -> SerialSettings {
        let stop_bits = self.stop_bits.unwrap_or(match self.parity {
            Parity::None => 2,
            Parity::Even | Parity::Odd => 1,
        });

        SerialSettings {
            baud_rate: self.speed,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits,
        }
    }
}

/// One configured tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    pub name: String,

    /// Human-readable name.
    #[serde(default)]
    pub desc: String,

    #[serde(default)]
    pub group: String,

    pub address: u16,

    /// e.g. `"read_float"` or `"read_uint,write_uint"`.
    pub operation: String,
}

impl TagConfig {
    pub fn to_tag(&self) -> Result<Tag, ConfigError> {
        let operation = Operation::parse(&self.operation).map_err(|source| ConfigError::Tag {
            name: self.name.clone(),
            source,
        })?;

        Ok(Tag::new(&self.name, self.address, operation)
            .with_display_name(&self.desc)
            .with_group(&self.group))
    }
}

impl GatewayConfig {
    /// Load and validate configuration from a JSON5 file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: GatewayConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tags.is_empty() {
            return Err(ConfigError::Validation(
                "At least one tag must be configured".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for tag in &self.tags {
            if tag.name.trim().is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Tag at address {} has an empty name",
                    tag.address
                )));
            }
            if !names.insert(tag.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate tag name '{}'",
                    tag.name
                )));
            }
            tag.to_tag()?;
        }

        let device = &self.device;
        if !device.url.trim().is_empty() {
            Endpoint::parse(device.url.trim())
                .map_err(|e| ConfigError::Validation(e.to_string()))?;
        }
        if device.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "device.max_attempts must be positive".to_string(),
            ));
        }
        if device.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "device.timeout_ms must be positive".to_string(),
            ));
        }
        if !(5..=8).contains(&device.data_bits) {
            return Err(ConfigError::Validation(format!(
                "device.data_bits must be 5-8, got {}",
                device.data_bits
            )));
        }
        if let Some(stop_bits) = device.stop_bits
            && !(1..=2).contains(&stop_bits)
        {
            return Err(ConfigError::Validation(format!(
                "device.stop_bits must be 1 or 2, got {}",
                stop_bits
            )));
        }

        self.http.validate().map_err(ConfigError::Validation)?;
        MetricsRenderer::new(self.http.prefix.as_str())
            .check_names(self.tags.iter().map(|tag| tag.name.as_str()))
            .map_err(ConfigError::Validation)?;

        if let Some(telegram) = &self.telegram {
            telegram.validate().map_err(ConfigError::Validation)?;
        }

        Ok(())
    }

    /// Poll engine settings.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            polling: Duration::from_millis(self.device.polling_ms),
            read_period: Duration::from_millis(self.device.read_period_ms),
            error_settle: Duration::from_millis(self.device.err_timeout_ms),
            max_attempts: self.device.max_attempts,
        }
    }

    /// Transport settings; `fallback_url` is used when the file sets none.
    pub fn modbus_settings(&self, fallback_url: &str) -> Result<ModbusSettings, ConfigError> {
        let url = self.device.url_or(fallback_url);
        let endpoint = Endpoint::parse(url).map_err(|e| ConfigError::Validation(e.to_string()))?;

        Ok(ModbusSettings {
            endpoint,
            unit_id: self.device.unit_id,
            timeout: Duration::from_millis(self.device.timeout_ms),
            serial: self.device.serial(),
        })
    }

    /// Tags in configuration order.
    pub fn build_tags(&self) -> Result<Vec<Tag>, ConfigError> {
        self.tags.iter().map(TagConfig::to_tag).collect()
    }
}
