//! Wiring of the controller, the poll thread and the front-ends.

use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Context;
use modgate_controller::{Controller, PollExit, Transport};
use modgate_exporter::{HttpServer, MetricsRenderer};
use modgate_telegram::TelegramBot;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;

/// How long front-ends get to finish after shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// A configured controller plus its front-end settings.
pub struct Gateway {
    config: GatewayConfig,
    controller: Arc<Controller>,
}

impl Gateway {
    /// Open the transport and register every configured tag.
    pub fn new<T>(config: GatewayConfig, transport: T) -> anyhow::Result<Self>
    where
        T: Transport + 'static,
    {
        let tags = config.build_tags()?;

        let mut controller = Controller::new(config.controller_config(), transport)
            .context("Failed to open device")?;
        for tag in tags {
            controller.add_tag(tag)?;
        }

        info!(tags = controller.registry().len(), "Controller ready");

        Ok(Self {
            config,
            controller: Arc::new(controller),
        })
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    /// Start the poll engine on its own thread.
    pub fn spawn_poller(&self) -> anyhow::Result<JoinHandle<PollExit>> {
        let controller = Arc::clone(&self.controller);
        thread::Builder::new()
            .name("poller".to_string())
            .spawn(move || controller.poll())
            .context("Failed to spawn poll thread")
    }

    /// Serve HTTP (and Telegram when configured) until `stop` resolves or
    /// the poll engine ends.
    ///
    /// An HTTP server that fails to start closes the controller and is
    /// returned as an error. Telegram failures are only logged.
    pub async fn serve(self, stop: impl Future<Output = ()>) -> anyhow::Result<()> {
        let Self { config, controller } = self;

        let listen_addr = config
            .http
            .listen_addr()
            .map_err(|e| anyhow::anyhow!(e))?;
        let server = HttpServer::new(
            Arc::clone(&controller),
            listen_addr,
            config.http.metrics_path.clone(),
            MetricsRenderer::new(&config.http.prefix),
        );
        let mut http = tokio::spawn(server.run(controller.shutdown_signal()));

        let bot = match &config.telegram {
            Some(telegram) => {
                let bot = TelegramBot::new(telegram, Arc::clone(&controller))?;
                let shutdown = controller.shutdown_signal();
                Some(tokio::spawn(async move {
                    if let Err(e) = bot.run(shutdown).await {
                        error!(error = %e, "Telegram bot stopped");
                    }
                }))
            }
            None => {
                info!("Telegram bot disabled");
                None
            }
        };

        let mut engine_done = controller.shutdown_signal();
        let mut http_result = None;
        tokio::select! {
            _ = stop => {
                info!("Received shutdown signal");
                controller.close();
            }
            _ = engine_done.wait_for(|closed| *closed) => {
                info!("Poll engine stopped");
            }
            result = &mut http => {
                controller.close();
                http_result = Some(result);
            }
        }

        let http_result = match http_result {
            Some(result) => result,
            None => match tokio::time::timeout(DRAIN_TIMEOUT, &mut http).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("HTTP server did not stop in time");
                    http.abort();
                    Ok(Ok(()))
                }
            },
        };

        if let Some(mut bot) = bot
            && tokio::time::timeout(DRAIN_TIMEOUT, &mut bot).await.is_err()
        {
            warn!("Telegram bot did not stop in time");
            bot.abort();
        }

        http_result.context("HTTP server task failed")?
    }
}
