use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::classifier::Classifier;
use crate::config::{AgentConfig, ConfigError};
use crate::delivery::DeliveryClient;
use crate::dispatcher::Dispatcher;
use crate::probes::{HeartbeatEmitter, LatencyProber, UptimeProber};
use crate::queue::log_queue;
use crate::runtime::{ContainerRuntime, RuntimeError};
use crate::status::{StatusForwarder, status_channel};
use crate::watcher::EventWatcher;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Container runtime unavailable: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Unable to build the HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct Agent {
    config: Arc<AgentConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    delivery: DeliveryClient,
    http: reqwest::Client,
}

impl Agent {
    pub fn new(
        config: Arc<AgentConfig>,
        runtime: Arc<dyn ContainerRuntime>,
        delivery: DeliveryClient,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            runtime,
            delivery,
            http,
        }
    }

    /// Start every task and wait until they all stopped.
    ///
    /// Fails only if the initial container listing fails; everything after
    /// that is handled and logged by the task it happens in.
    pub async fn run(self, stop: CancellationToken) -> Result<(), AgentError> {
        let config = self.config;
        // Events from this moment on are replayed once the watcher subscribes.
        let listed_at = Utc::now();
        let initial = self.runtime.list_running().await?;

        let (queue, queue_rx) = log_queue(config.queue_capacity);
        let (reporter, status_rx) = status_channel();
        let mut tasks = JoinSet::new();

        tasks.spawn(StatusForwarder::new(status_rx, self.delivery.clone()).run(stop.clone()));
        tasks.spawn(
            Dispatcher::new(
                queue_rx,
                Classifier::new(config.parse_json),
                self.delivery.clone(),
            )
            .run(stop.clone()),
        );

        let mut watcher = EventWatcher::new(
            Arc::clone(&self.runtime),
            Arc::clone(&config),
            queue,
            reporter.clone(),
            stop.child_token(),
        );
        watcher.discover(initial, listed_at).await;
        tasks.spawn(watcher.run(stop.clone()));

        tasks.spawn(
            HeartbeatEmitter::new(
                Arc::clone(&self.runtime),
                reporter,
                config.allow_list.clone(),
                config.heartbeat_interval,
            )
            .run(stop.clone()),
        );

        match &config.target {
            Some(target) => {
                tasks.spawn(
                    LatencyProber::new(
                        self.http.clone(),
                        target.clone(),
                        self.delivery.clone(),
                        config.latency_interval,
                        config.probe_pause,
                    )
                    .run(stop.clone()),
                );
                tasks.spawn(
                    UptimeProber::new(
                        self.http.clone(),
                        target.uptime.clone(),
                        self.delivery.clone(),
                        config.uptime_interval,
                    )
                    .run(stop.clone()),
                );
            }
            None => log::info!("No target service configured, latency and uptime probes are off"),
        }

        log::info!("Agent running");
        let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                log::error!("Agent task failed: {e}");
            }
        }
        log::info!("Agent stopped");
        Ok(())
    }
}
