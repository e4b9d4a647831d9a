use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{next_tick, ticker};
use crate::delivery::ContainerStatus;
use crate::runtime::ContainerRuntime;
use crate::status::StatusReporter;

/// Reports a heartbeat for every running, monitored container on a fixed
/// interval, regardless of which lifecycle events were seen.
pub struct HeartbeatEmitter {
    runtime: Arc<dyn ContainerRuntime>,
    status: StatusReporter,
    allow_list: Vec<String>,
    interval: Duration,
}

impl HeartbeatEmitter {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        status: StatusReporter,
        allow_list: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            runtime,
            status,
            allow_list,
            interval,
        }
    }

    /// One heartbeat round. Returns how many heartbeats were reported.
    pub async fn beat(&self) -> usize {
        let containers = match self.runtime.list_running().await {
            Ok(containers) => containers,
            Err(e) => {
                log::warn!("Heartbeat skipped, unable to list containers: {e}");
                return 0;
            }
        };
        let mut sent = 0;
        for container in containers
            .iter()
            .filter(|c| c.should_monitor(&self.allow_list))
        {
            self.status
                .report(&container.name, ContainerStatus::Heartbeat)
                .await;
            sent += 1;
        }
        sent
    }

    pub async fn run(self, stop: CancellationToken) {
        let mut interval = ticker(self.interval);
        // Startup already reported every container up.
        interval.tick().await;
        while next_tick(&mut interval, &stop).await {
            let sent = self.beat().await;
            log::debug!("Sent {sent} heartbeats");
        }
    }
}
