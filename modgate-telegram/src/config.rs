//! Bot configuration.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token.
    pub token: String,

    /// Allowed users, keyed by numeric user id (value is a free-form name).
    #[serde(default)]
    pub owners: BTreeMap<String, String>,

    /// Drop a pending command after this much inactivity (default: 300).
    #[serde(default = "default_idle_reset")]
    pub idle_reset_secs: u64,

    /// Long-polling timeout for `getUpdates` (default: 60).
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Bot API base URL (default: "https://api.telegram.org").
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Tag listing commands.
    #[serde(default = "default_lists")]
    pub lists: Vec<ListCommandConfig>,

    /// Setpoint command.
    #[serde(default)]
    pub setpoint: SetpointCommandConfig,
}

/// A command replying with the tags of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCommandConfig {
    pub command: String,
    #[serde(default)]
    pub description: String,
    /// Group to list; empty lists every tag.
    #[serde(default)]
    pub group: String,
}

/// The interactive setpoint command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetpointCommandConfig {
    #[serde(default = "default_setpoint_command")]
    pub command: String,
    #[serde(default = "default_setpoint_description")]
    pub description: String,
    #[serde(default = "default_setpoint_group")]
    pub group: String,
}

fn default_idle_reset() -> u64 {
    300
}

fn default_poll_timeout() -> u64 {
    60
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_lists() -> Vec<ListCommandConfig> {
    [
        ("state_all", "Show all tags", ""),
        ("state", "Show measurements", "state"),
        ("ust", "Show setpoints", "ust"),
    ]
    .into_iter()
    .map(|(command, description, group)| ListCommandConfig {
        command: command.to_string(),
        description: description.to_string(),
        group: group.to_string(),
    })
    .collect()
}

fn default_setpoint_command() -> String {
    "sust".to_string()
}

fn default_setpoint_description() -> String {
    "Change setpoints".to_string()
}

fn default_setpoint_group() -> String {
    "ust".to_string()
}

impl Default for SetpointCommandConfig {
    fn default() -> Self {
        Self {
            command: default_setpoint_command(),
            description: default_setpoint_description(),
            group: default_setpoint_group(),
        }
    }
}

impl TelegramConfig {
    /// Parsed owner ids.
    pub fn owner_ids(&self) -> Result<HashSet<i64>, String> {
        self.owners
            .keys()
            .map(|id| {
                id.trim()
                    .parse::<i64>()
                    .map_err(|_| format!("Telegram owner id '{}' is not numeric", id))
            })
            .collect()
    }

    /// Validate the settings, returning a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.token.trim().is_empty() {
            return Err("Telegram token must not be empty".to_string());
        }

        if self.owner_ids()?.is_empty() {
            return Err("Telegram owners must not be empty".to_string());
        }

        if self.poll_timeout_secs == 0 {
            return Err("Telegram poll_timeout_secs must be positive".to_string());
        }

        let mut seen = HashSet::new();
        let names = self
            .lists
            .iter()
            .map(|l| l.command.as_str())
            .chain(std::iter::once(self.setpoint.command.as_str()));
        for name in names {
            if name.is_empty() || name.starts_with('/') || name.contains(char::is_whitespace) {
                return Err(format!("Invalid Telegram command name '{}'", name));
            }
            if !seen.insert(name) {
                return Err(format!("Duplicate Telegram command '{}'", name));
            }
        }

        Ok(())
    }
}
