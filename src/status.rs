//! Ordered status delivery.
//!
//! The watcher and heartbeat loop report through a cloneable
//! [`StatusReporter`]; a single [`StatusForwarder`] task drains the channel and
//! delivers events in the order they were reported, so a slow ingestion API
//! never stalls lifecycle event handling.

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;

use crate::delivery::{ContainerStatus, DeliveryClient, StatusEvent};

const STATUS_BUFFER: usize = 256;

#[derive(Clone)]
pub struct StatusReporter {
    tx: Sender<StatusEvent>,
}

pub fn status_channel() -> (StatusReporter, Receiver<StatusEvent>) {
    let (tx, rx) = mpsc::channel(STATUS_BUFFER);
    (StatusReporter { tx }, rx)
}

impl StatusReporter {
    pub async fn report(&self, container_name: &str, status: ContainerStatus) {
        log::info!("Container {container_name} is {}", status.as_ref());
        let event = StatusEvent::new(container_name, status);
        if self.tx.send(event).await.is_err() {
            log::error!(
                "Status channel closed, dropping {} event for {container_name}",
                status.as_ref()
            );
        }
    }
}

pub struct StatusForwarder {
    rx: Receiver<StatusEvent>,
    delivery: DeliveryClient,
}

impl StatusForwarder {
    pub fn new(rx: Receiver<StatusEvent>, delivery: DeliveryClient) -> Self {
        Self { rx, delivery }
    }

    async fn forward(&self, event: StatusEvent) {
        log::debug!(
            "Forwarding {} status of {} reported at {}",
            event.status.as_ref(),
            event.container_name,
            event.timestamp.to_rfc3339()
        );
        let _ = self.delivery.deliver(event).await;
    }

    pub async fn run(mut self, stop: CancellationToken) {
        loop {
            tokio::select! {
                maybe_event = self.rx.recv() => match maybe_event {
                    Some(event) => self.forward(event).await,
                    None => break,
                },
                _ = stop.cancelled() => {
                    // Best effort for whatever is already queued.
                    while let Ok(event) = self.rx.try_recv() {
                        self.forward(event).await;
                    }
                    break;
                }
            }
        }
        log::info!("Status forwarder stopped");
    }
}
