//! Container lifecycle tracking.
//!
//! The watcher owns the per-container state machine. A container becomes
//! `Active` when it is discovered at startup or started, and `Stopped` when it
//! dies, stops or is paused. Entering `Active` attaches a log streamer and
//! reports the container up; entering `Stopped` reports it down and, after an
//! abnormal exit, pushes the container's last lines through the log queue.
//!
//! Subscriptions replay events from the moment of the last listing (or of the
//! last dropped subscription), so nothing that happens in between is lost.
//! When the runtime event subscription drops, the watcher resubscribes with
//! exponential backoff and reconciles its state against a fresh listing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::delivery::ContainerStatus;
use crate::queue::LogSender;
use crate::runtime::{
    ContainerRuntime, LifecycleAction, LifecycleEvent, MonitoredContainer, RuntimeError,
};
use crate::status::StatusReporter;
use crate::streamer::StreamerSet;

const RESUBSCRIBE_BASE: Duration = Duration::from_secs(1);
const RESUBSCRIBE_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Active,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Died(Option<i64>),
    Stopped,
    Vanished,
}

#[derive(Debug, Clone)]
struct Tracked {
    name: String,
    state: ContainerState,
    monitored: bool,
}

pub struct EventWatcher {
    runtime: Arc<dyn ContainerRuntime>,
    config: Arc<AgentConfig>,
    queue: LogSender,
    status: StatusReporter,
    streamers: StreamerSet,
    containers: HashMap<String, Tracked>,
    events_since: Option<DateTime<Utc>>,
    resubscribe_base: Duration,
    resubscribe_max: Duration,
}

impl EventWatcher {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        config: Arc<AgentConfig>,
        queue: LogSender,
        status: StatusReporter,
        stop: CancellationToken,
    ) -> Self {
        let streamers = StreamerSet::new(
            Arc::clone(&runtime),
            queue.clone(),
            config.tail_lines,
            stop,
        );
        Self {
            runtime,
            config,
            queue,
            status,
            streamers,
            containers: HashMap::new(),
            events_since: None,
            resubscribe_base: RESUBSCRIBE_BASE,
            resubscribe_max: RESUBSCRIBE_MAX,
        }
    }

    #[cfg(test)]
    pub fn with_resubscribe_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.resubscribe_base = base;
        self.resubscribe_max = max;
        self
    }

    #[cfg(test)]
    pub fn state(&self, id: &str) -> Option<ContainerState> {
        self.containers.get(id).map(|tracked| tracked.state)
    }

    /// Track the containers found by the startup listing. `listed_at` must be
    /// taken before the listing was requested.
    pub async fn discover(&mut self, containers: Vec<MonitoredContainer>, listed_at: DateTime<Utc>) {
        log::info!("Discovered {} running containers", containers.len());
        self.events_since = Some(listed_at);
        for container in containers {
            self.activate(container).await;
        }
    }

    /// Whether a start for this id would change nothing.
    fn already_active(&self, id: &str) -> bool {
        match self.containers.get(id) {
            Some(tracked) if tracked.state == ContainerState::Active => {
                !tracked.monitored || self.streamers.is_attached(id)
            }
            _ => false,
        }
    }

    async fn activate(&mut self, container: MonitoredContainer) {
        let monitored = container.should_monitor(&self.config.allow_list);
        let previous = self.containers.get(&container.id).map(|t| t.state);

        if previous == Some(ContainerState::Active) {
            // A streamer that ended on its own while the container was
            // considered active gets replaced without reporting again.
            if monitored && self.streamers.attach(container.clone()) {
                log::info!("Re-attached to {}", container.name);
            }
            return;
        }

        self.containers.insert(
            container.id.clone(),
            Tracked {
                name: container.name.clone(),
                state: ContainerState::Active,
                monitored,
            },
        );
        if !monitored {
            log::debug!("Ignoring container {}", container.name);
            return;
        }
        self.status.report(&container.name, ContainerStatus::Up).await;
        self.streamers.attach(container);
    }

    async fn deactivate(&mut self, id: &str, reason: StopReason) {
        let Some(tracked) = self.containers.get_mut(id) else {
            log::debug!("{reason:?} for untracked container {id}");
            return;
        };
        if tracked.state == ContainerState::Stopped {
            return;
        }
        tracked.state = ContainerState::Stopped;
        let name = tracked.name.clone();
        if !tracked.monitored {
            return;
        }

        self.status.report(&name, ContainerStatus::Down).await;
        match reason {
            StopReason::Died(Some(code)) if code != 0 => {
                log::warn!("Container {name} exited with code {code}");
                self.autopsy(id, &name).await;
            }
            _ => {}
        }
        self.streamers.detach(id);
    }

    /// Feed the last lines of a crashed container through the log queue.
    async fn autopsy(&self, id: &str, name: &str) {
        let lines = match self.runtime.tail_logs(id, self.config.autopsy_lines).await {
            Ok(lines) => lines,
            Err(e) => {
                log::error!("Unable to fetch the last logs of {name}: {e}");
                return;
            }
        };
        log::info!("Collected {} final log lines of {name}", lines.len());
        for line in lines.into_iter().filter(|line| !line.trim().is_empty()) {
            if self.queue.send(name, line).await.is_err() {
                log::error!("Log queue closed during autopsy of {name}");
                return;
            }
        }
    }

    pub async fn handle_event(&mut self, event: LifecycleEvent) {
        let id = event.container_id.as_str();
        match &event.action {
            LifecycleAction::Start | LifecycleAction::Unpause => {
                if self.already_active(id) {
                    return;
                }
                match self.runtime.get_container(id).await {
                    Ok(container) => self.activate(container).await,
                    Err(RuntimeError::NotFound(_)) => {
                        log::debug!(
                            "Container {} disappeared before it could be tracked",
                            event.container_name().unwrap_or(id)
                        );
                    }
                    Err(e) => log::warn!(
                        "Unable to inspect container {}: {e}",
                        event.container_name().unwrap_or(id)
                    ),
                }
            }
            LifecycleAction::Die => self.deactivate(id, StopReason::Died(event.exit_code())).await,
            LifecycleAction::Stop | LifecycleAction::Pause => {
                self.deactivate(id, StopReason::Stopped).await
            }
            LifecycleAction::Destroy => {
                self.streamers.detach(id);
                self.containers.remove(id);
            }
            LifecycleAction::Other(action) => log::trace!("Ignoring {action} event for {id}"),
        }
    }

    /// Bring tracked state in line with what is actually running.
    pub async fn reconcile(&mut self) {
        let running = match self.runtime.list_running().await {
            Ok(running) => running,
            Err(e) => {
                log::warn!("Unable to list containers for reconciliation: {e}");
                return;
            }
        };
        let running_ids: HashSet<String> = running.iter().map(|c| c.id.clone()).collect();

        let gone: Vec<String> = self
            .containers
            .iter()
            .filter(|(id, tracked)| {
                tracked.state == ContainerState::Active && !running_ids.contains(*id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in gone {
            self.deactivate(&id, StopReason::Vanished).await;
        }

        for container in running {
            if !self.already_active(&container.id) {
                self.activate(container).await;
            }
        }
    }

    pub async fn run(mut self, stop: CancellationToken) {
        let mut backoff = self.resubscribe_base;
        let mut resubscribing = false;
        loop {
            let mut events = self.runtime.events(self.events_since.take());
            if resubscribing {
                self.reconcile().await;
            }
            log::info!("Watching container lifecycle events");

            loop {
                let next = tokio::select! {
                    _ = stop.cancelled() => {
                        log::info!(
                            "Event watcher stopped, cancelling {} log streamers",
                            self.streamers.len()
                        );
                        self.streamers.detach_all();
                        return;
                    }
                    next = events.next() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        backoff = self.resubscribe_base;
                        self.handle_event(event).await;
                    }
                    Some(Err(e)) => {
                        log::error!("Container event subscription failed: {e}");
                        break;
                    }
                    None => {
                        log::error!("Container event subscription closed");
                        break;
                    }
                }
            }

            self.events_since = Some(Utc::now());
            log::warn!("Resubscribing to container events in {backoff:?}");
            tokio::select! {
                _ = stop.cancelled() => {
                    self.streamers.detach_all();
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.resubscribe_max);
            resubscribing = true;
        }
    }
}
