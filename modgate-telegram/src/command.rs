//! Bot commands.
//!
//! A command runs in two phases. [`Command::action`] handles the slash
//! command itself and any plain text sent while the command is pending;
//! [`Command::callback`] handles inline button presses. Both return a
//! [`Step`]: `Done` ends the conversation, `Continue` keeps the command
//! pending.

use modgate_controller::{Controller, Tag, writable};
use tracing::{info, warn};

use crate::api::InlineKeyboardButton;
use crate::dispatcher::parse_command;

/// A message to send back.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub chat_id: i64,
    pub text: String,
    pub keyboard: Option<Vec<Vec<InlineKeyboardButton>>>,
}

impl Outgoing {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            keyboard: None,
        }
    }
}

/// Result of handling one input.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The command finished; send the replies and forget it.
    Done(Vec<Outgoing>),
    /// The command waits for more input.
    Continue(Vec<Outgoing>),
}

/// A conversational bot command.
pub trait Command: Send {
    /// Command name without the leading slash.
    fn command(&self) -> &str;

    fn description(&self) -> &str;

    /// Handle the command invocation or a follow-up text message.
    fn action(&mut self, controller: &Controller, chat_id: i64, text: &str) -> Step;

    /// Handle an inline button press.
    fn callback(&mut self, _controller: &Controller, _chat_id: i64, _data: &str) -> Step {
        Step::Done(Vec::new())
    }

    /// Clear any conversation state.
    fn reset(&mut self) {}
}

/// `label: value` lines for the tags of one group.
pub fn list_tags(controller: &Controller, group: &str) -> String {
    controller
        .tags()
        .iter()
        .filter(|s| s.tag.in_group(group))
        .map(|s| format!("{}: {}", s.tag.label(), s.value_string()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replies with the current values of a tag group.
#[derive(Debug, Clone)]
pub struct ListCommand {
    command: String,
    description: String,
    group: String,
}

impl ListCommand {
    pub fn new(
        command: impl Into<String>,
        description: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
            group: group.into(),
        }
    }
}

impl Command for ListCommand {
    fn command(&self) -> &str {
        &self.command
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn action(&mut self, controller: &Controller, chat_id: i64, _text: &str) -> Step {
        let text = list_tags(controller, &self.group);
        if text.is_empty() {
            return Step::Done(Vec::new());
        }
        Step::Done(vec![Outgoing::text(chat_id, text)])
    }
}

/// Split buttons into keyboard rows of `size`.
pub fn chunk_buttons(
    buttons: Vec<InlineKeyboardButton>,
    size: usize,
) -> Vec<Vec<InlineKeyboardButton>> {
    buttons.chunks(size.max(1)).map(<[_]>::to_vec).collect()
}

/// Interactive write of one tag: pick a tag from a keyboard, then send a value.
#[derive(Debug, Clone)]
pub struct SetpointCommand {
    command: String,
    description: String,
    group: String,
    current: Option<Tag>,
}

impl SetpointCommand {
    pub fn new(
        command: impl Into<String>,
        description: impl Into<String>,
        group: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            description: description.into(),
            group: group.into(),
            current: None,
        }
    }

    /// Tag selected for writing, if any.
    pub fn current(&self) -> Option<&Tag> {
        self.current.as_ref()
    }

    fn keyboard(&self, controller: &Controller, chat_id: i64) -> Step {
        let buttons: Vec<InlineKeyboardButton> = controller
            .registry()
            .group(&self.group)
            .map(|tag| InlineKeyboardButton {
                text: tag.label().to_string(),
                callback_data: tag.name().to_string(),
            })
            .collect();

        if buttons.is_empty() {
            return Step::Done(vec![Outgoing::text(chat_id, "No setpoints configured")]);
        }

        Step::Continue(vec![Outgoing {
            chat_id,
            text: "Select a setpoint".to_string(),
            keyboard: Some(chunk_buttons(buttons, 2)),
        }])
    }
}

impl Command for SetpointCommand {
    fn command(&self) -> &str {
        &self.command
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn action(&mut self, controller: &Controller, chat_id: i64, text: &str) -> Step {
        // A repeated invocation starts over from the keyboard.
        if parse_command(text).is_some() {
            self.current = None;
        }
        let Some(tag) = self.current.take() else {
            return self.keyboard(controller, chat_id);
        };

        let value: f64 = match text.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                return Step::Done(vec![Outgoing::text(chat_id, "Invalid value!")]);
            }
        };
        if let Err(e) = tag.check_value(value) {
            return Step::Done(vec![Outgoing::text(
                chat_id,
                format!("Invalid value! {}", e),
            )]);
        }

        let reply = match controller.write_tag(&tag, value) {
            Ok(()) => {
                info!(tag = %tag.name(), value, "Setpoint written from chat");
                format!("Value set: {} = {}", tag.label(), value)
            }
            Err(e) => {
                warn!(tag = %tag.name(), error = %e, "Setpoint write failed");
                format!("Write error: {}", e)
            }
        };

        Step::Done(vec![Outgoing::text(chat_id, reply)])
    }

    fn callback(&mut self, controller: &Controller, chat_id: i64, data: &str) -> Step {
        self.current = None;

        let text = match controller.find_tag(data) {
            None => format!("Invalid tag {}", data),
            Some(tag) if !writable(tag) => {
                format!("Tag {} is not writable, check the configuration", data)
            }
            Some(tag) => {
                self.current = Some(tag.clone());
                format!("Enter value for {}:", tag.label())
            }
        };

        Step::Continue(vec![Outgoing::text(chat_id, text)])
    }

    fn reset(&mut self) {
        self.current = None;
    }
}
