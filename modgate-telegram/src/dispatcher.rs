//! Routing of updates to commands.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use modgate_controller::Controller;
use tracing::{debug, info};

use crate::api::{BotCommand, Update};
use crate::command::{Command, Outgoing, Step};

/// Something the bot must send in response to an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Message(Outgoing),
    AnswerCallback { id: String, text: String },
}

/// Owner filter plus the single pending conversation.
///
/// At most one command is pending at a time. It receives plain text and
/// button presses until it finishes, another command is invoked, or it sits
/// idle for longer than the reset interval.
pub struct Dispatcher {
    controller: Arc<Controller>,
    owners: HashSet<i64>,
    commands: Vec<Box<dyn Command>>,
    pending: Option<usize>,
    last_command: Instant,
    idle_reset: Duration,
}

impl Dispatcher {
    pub fn new(controller: Arc<Controller>, owners: HashSet<i64>, idle_reset: Duration) -> Self {
        Self {
            controller,
            owners,
            commands: Vec::new(),
            pending: None,
            last_command: Instant::now(),
            idle_reset,
        }
    }

    pub fn add_command(&mut self, command: Box<dyn Command>) {
        self.commands.push(command);
    }

    /// Command list for `setMyCommands`.
    pub fn bot_commands(&self) -> Vec<BotCommand> {
        self.commands
            .iter()
            .map(|c| BotCommand {
                command: c.command().to_string(),
                description: c.description().to_string(),
            })
            .collect()
    }

    /// Name of the pending command.
    pub fn pending(&self) -> Option<&str> {
        self.pending.map(|i| self.commands[i].command())
    }

    /// Handle one update received at `now`.
    pub fn handle(&mut self, update: &Update, now: Instant) -> Vec<Reply> {
        if self.pending.is_some()
            && now.saturating_duration_since(self.last_command) >= self.idle_reset
        {
            debug!("Pending command expired");
            self.clear_pending();
        }

        if let Some(message) = &update.message {
            let Some(from) = message.from.as_ref().filter(|u| self.owners.contains(&u.id)) else {
                return Vec::new();
            };
            let Some(text) = message.text.as_deref() else {
                return Vec::new();
            };

            info!(
                chat = message.chat.id,
                user = from.username.as_deref().unwrap_or_default(),
                text,
                "Telegram message"
            );

            return self.handle_text(message.chat.id, text, now);
        }

        if let Some(query) = &update.callback_query {
            if !self.owners.contains(&query.from.id) {
                return Vec::new();
            }
            let data = query.data.clone().unwrap_or_default();
            let mut replies = vec![Reply::AnswerCallback {
                id: query.id.clone(),
                text: data.clone(),
            }];

            if let (Some(index), Some(message)) = (self.pending, &query.message) {
                let step = self.commands[index].callback(&self.controller, message.chat.id, &data);
                replies.extend(self.finish(index, step, None));
            }
            return replies;
        }

        Vec::new()
    }

    fn handle_text(&mut self, chat_id: i64, text: &str, now: Instant) -> Vec<Reply> {
        if let Some(name) = parse_command(text) {
            let Some(index) = self.commands.iter().position(|c| c.command() == name) else {
                return Vec::new();
            };

            if self.pending != Some(index) {
                self.clear_pending();
            }
            let step = self.commands[index].action(&self.controller, chat_id, text);
            return self.finish(index, step, Some(now));
        }

        match self.pending {
            Some(index) => {
                let step = self.commands[index].action(&self.controller, chat_id, text);
                self.finish(index, step, None)
            }
            None => Vec::new(),
        }
    }

    /// Apply a step result. `started` marks a fresh invocation.
    fn finish(&mut self, index: usize, step: Step, started: Option<Instant>) -> Vec<Reply> {
        let out = match step {
            Step::Done(out) => {
                self.commands[index].reset();
                self.pending = None;
                out
            }
            Step::Continue(out) => {
                self.pending = Some(index);
                if let Some(now) = started {
                    self.last_command = now;
                }
                out
            }
        };

        out.into_iter()
            .filter(|o| !o.text.trim().is_empty())
            .map(Reply::Message)
            .collect()
    }

    fn clear_pending(&mut self) {
        if let Some(index) = self.pending.take() {
            self.commands[index].reset();
        }
    }
}

/// Command name of a `/command[@bot] args` message.
pub fn parse_command(text: &str) -> Option<&str> {
    let word = text.strip_prefix('/')?.split_whitespace().next()?;
    let name = word.split('@').next().unwrap_or(word);
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CallbackQuery, Chat, Message, User};
    use crate::command::{ListCommand, SetpointCommand};
    use modgate_controller::{
        ControllerConfig, MockTransport, Operation, Tag, TransportCall,
    };

    const OWNER: i64 = 42;

    fn dispatcher() -> (Dispatcher, MockTransport) {
        let mock = MockTransport::new();
        let mut controller = Controller::new(ControllerConfig::default(), mock.clone()).unwrap();
        controller
            .add_tag(Tag::new("temp", 1, Operation::READ_FLOAT).with_group("state"))
            .unwrap();
        controller
            .add_tag(
                Tag::new("day", 2, Operation::READ_UINT | Operation::WRITE_UINT).with_group("ust"),
            )
            .unwrap();
        mock.clear_calls();

        let mut dispatcher = Dispatcher::new(
            Arc::new(controller),
            HashSet::from([OWNER]),
            Duration::from_secs(300),
        );
        dispatcher.add_command(Box::new(ListCommand::new("state", "State", "state")));
        dispatcher.add_command(Box::new(SetpointCommand::new("sust", "Setpoints", "ust")));
        (dispatcher, mock)
    }

    fn message(from: i64, text: &str) -> Update {
        Update {
            update_id: 1,
            message: Some(Message {
                message_id: 1,
                from: Some(User {
                    id: from,
                    username: None,
                }),
                chat: Chat { id: from },
                text: Some(text.to_string()),
            }),
            callback_query: None,
        }
    }

    fn callback(from: i64, data: &str) -> Update {
        Update {
            update_id: 2,
            message: None,
            callback_query: Some(CallbackQuery {
                id: "cb".to_string(),
                from: User {
                    id: from,
                    username: None,
                },
                message: Some(Message {
                    message_id: 2,
                    from: None,
                    chat: Chat { id: from },
                    text: None,
                }),
                data: Some(data.to_string()),
            }),
        }
    }

    fn texts(replies: &[Reply]) -> Vec<&str> {
        replies
            .iter()
            .filter_map(|r| match r {
                Reply::Message(o) => Some(o.text.as_str()),
                Reply::AnswerCallback { .. } => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/state"), Some("state"));
        assert_eq!(parse_command("/state@my_bot extra"), Some("state"));
        assert_eq!(parse_command("state"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn test_ignores_strangers() {
        let (mut dispatcher, _) = dispatcher();
        let now = Instant::now();

        assert!(dispatcher.handle(&message(7, "/state"), now).is_empty());
        assert!(dispatcher.handle(&callback(7, "day"), now).is_empty());
    }

    #[test]
    fn test_list_command_completes() {
        let (mut dispatcher, _) = dispatcher();

        let replies = dispatcher.handle(&message(OWNER, "/state"), Instant::now());

        assert_eq!(texts(&replies), vec!["temp: 0"]);
        assert_eq!(dispatcher.pending(), None);
    }

    #[test]
    fn test_plain_text_without_pending_is_ignored() {
        let (mut dispatcher, _) = dispatcher();
        assert!(dispatcher.handle(&message(OWNER, "hello"), Instant::now()).is_empty());
    }

    #[test]
    fn test_setpoint_conversation() {
        let (mut dispatcher, mock) = dispatcher();
        let now = Instant::now();

        let replies = dispatcher.handle(&message(OWNER, "/sust"), now);
        assert_eq!(texts(&replies), vec!["Select a setpoint"]);
        assert_eq!(dispatcher.pending(), Some("sust"));

        let replies = dispatcher.handle(&callback(OWNER, "day"), now);
        assert_eq!(
            replies[0],
            Reply::AnswerCallback {
                id: "cb".to_string(),
                text: "day".to_string()
            }
        );
        assert_eq!(texts(&replies), vec!["Enter value for day:"]);

        let replies = dispatcher.handle(&message(OWNER, "30"), now);
        assert_eq!(texts(&replies), vec!["Value set: day = 30"]);
        assert_eq!(dispatcher.pending(), None);
        assert_eq!(mock.calls(), vec![TransportCall::WriteU16(2, 30)]);
    }

    #[test]
    fn test_pending_command_expires() {
        let (mut dispatcher, mock) = dispatcher();
        let start = Instant::now();

        dispatcher.handle(&message(OWNER, "/sust"), start);
        dispatcher.handle(&callback(OWNER, "day"), start);

        let later = start + Duration::from_secs(301);
        assert!(dispatcher.handle(&message(OWNER, "30"), later).is_empty());
        assert_eq!(dispatcher.pending(), None);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_new_command_replaces_pending() {
        let (mut dispatcher, mock) = dispatcher();
        let now = Instant::now();

        dispatcher.handle(&message(OWNER, "/sust"), now);
        dispatcher.handle(&callback(OWNER, "day"), now);
        dispatcher.handle(&message(OWNER, "/state"), now);

        assert_eq!(dispatcher.pending(), None);
        assert!(dispatcher.handle(&message(OWNER, "30"), now).is_empty());
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_repeated_setpoint_command_restarts() {
        let (mut dispatcher, mock) = dispatcher();
        let now = Instant::now();

        dispatcher.handle(&message(OWNER, "/sust"), now);
        dispatcher.handle(&callback(OWNER, "day"), now);
        let replies = dispatcher.handle(&message(OWNER, "/sust"), now);

        assert_eq!(texts(&replies), vec!["Select a setpoint"]);
        assert_eq!(dispatcher.pending(), Some("sust"));

        dispatcher.handle(&callback(OWNER, "day"), now);
        let replies = dispatcher.handle(&message(OWNER, "70000"), now);

        assert_eq!(
            texts(&replies),
            vec!["Invalid value! 70000 is outside 0..=65535"]
        );
        assert_eq!(dispatcher.pending(), None);
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_callback_without_pending_is_only_answered() {
        let (mut dispatcher, _) = dispatcher();

        let replies = dispatcher.handle(&callback(OWNER, "day"), Instant::now());

        assert_eq!(replies.len(), 1);
        assert!(matches!(replies[0], Reply::AnswerCallback { .. }));
    }

    #[test]
    fn test_bot_commands() {
        let (dispatcher, _) = dispatcher();
        let names: Vec<String> = dispatcher
            .bot_commands()
            .into_iter()
            .map(|c| c.command)
            .collect();

        assert_eq!(names, vec!["state", "sust"]);
    }
}
