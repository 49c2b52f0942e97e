//! Telegram front-end for a modgate [`Controller`].
//!
//! The bot long-polls the Bot API, accepts messages only from configured
//! owners and routes them through a [`Dispatcher`]. Commands list tag values
//! by group or write a setpoint through the controller's write gateway.
//!
//! Bot failures are logged and retried; they never stop the gateway.

pub mod api;
pub mod command;
pub mod config;
pub mod dispatcher;

use std::sync::Arc;
use std::time::{Duration, Instant};

use modgate_controller::Controller;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub use api::{ApiError, BotApi};
pub use command::{Command, ListCommand, Outgoing, SetpointCommand, Step};
pub use config::{ListCommandConfig, SetpointCommandConfig, TelegramConfig};
pub use dispatcher::{Dispatcher, Reply};

const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A configured bot bound to one controller.
pub struct TelegramBot {
    api: BotApi,
    dispatcher: Dispatcher,
    poll_timeout_secs: u64,
}

impl TelegramBot {
    /// Build the bot and its commands from configuration.
    pub fn new(config: &TelegramConfig, controller: Arc<Controller>) -> anyhow::Result<Self> {
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        let owners = config.owner_ids().map_err(|e| anyhow::anyhow!(e))?;

        let mut dispatcher = Dispatcher::new(
            controller,
            owners,
            Duration::from_secs(config.idle_reset_secs),
        );
        for list in &config.lists {
            dispatcher.add_command(Box::new(ListCommand::new(
                &list.command,
                &list.description,
                &list.group,
            )));
        }
        dispatcher.add_command(Box::new(SetpointCommand::new(
            &config.setpoint.command,
            &config.setpoint.description,
            &config.setpoint.group,
        )));

        Ok(Self {
            api: BotApi::new(&config.api_url, &config.token),
            dispatcher,
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    /// Poll for updates until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let Self {
            api,
            mut dispatcher,
            poll_timeout_secs,
        } = self;

        let me = api.get_me().await?;
        info!(
            username = me.username.as_deref().unwrap_or_default(),
            "Authorized on Telegram account"
        );

        if let Err(e) = api.set_my_commands(&dispatcher.bot_commands()).await {
            warn!(error = %e, "Failed to register bot commands");
        }

        let mut offset = 0;
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let updates = tokio::select! {
                _ = shutdown.changed() => break,
                result = api.get_updates(offset, poll_timeout_secs) => result,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Telegram getUpdates failed");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                // Commands may write to the device, which blocks.
                let (returned, replies) = tokio::task::spawn_blocking(move || {
                    let replies = dispatcher.handle(&update, Instant::now());
                    (dispatcher, replies)
                })
                .await?;
                dispatcher = returned;

                send_replies(&api, replies).await;
            }
        }

        info!("Telegram bot stopped");
        Ok(())
    }
}

async fn send_replies(api: &BotApi, replies: Vec<Reply>) {
    for reply in replies {
        let result = match &reply {
            Reply::Message(out) => {
                api.send_message(out.chat_id, out.text.trim(), out.keyboard.as_deref())
                    .await
            }
            Reply::AnswerCallback { id, text } => api.answer_callback_query(id, text).await,
        };

        if let Err(e) = result {
            error!(error = %e, "Telegram send error");
        }
    }
}
