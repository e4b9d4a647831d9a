//! Per-container log streaming.
//!
//! Each monitored container gets one task following its output and pushing
//! every non-empty line onto the shared queue. The tasks are kept in a
//! [`StreamerSet`] keyed by container id so they can be started and cancelled
//! explicitly as containers come and go.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::LogSender;
use crate::runtime::{ContainerRuntime, MonitoredContainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The runtime closed the stream, usually because the container stopped.
    Closed,
    Cancelled,
    Failed,
    QueueClosed,
}

pub struct LogStreamer {
    runtime: Arc<dyn ContainerRuntime>,
    queue: LogSender,
    container: MonitoredContainer,
    tail: usize,
}

impl LogStreamer {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        queue: LogSender,
        container: MonitoredContainer,
        tail: usize,
    ) -> Self {
        Self {
            runtime,
            queue,
            container,
            tail,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> StreamEnd {
        let name = &self.container.name;
        log::info!("Streaming logs of {name} (tail {})", self.tail);
        let mut lines = self.runtime.stream_logs(&self.container.id, self.tail);

        let end = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break StreamEnd::Cancelled,
                next = lines.next() => next,
            };
            match next {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    // Waiting here is the backpressure on this container's reader.
                    let sent = tokio::select! {
                        _ = cancel.cancelled() => break StreamEnd::Cancelled,
                        sent = self.queue.send(name, line) => sent,
                    };
                    if sent.is_err() {
                        break StreamEnd::QueueClosed;
                    }
                }
                Some(Err(e)) => {
                    log::warn!("Log stream of {name} failed: {e}");
                    break StreamEnd::Failed;
                }
                None => break StreamEnd::Closed,
            }
        };
        log::info!("Stopped streaming logs of {name} ({end:?})");
        end
    }
}

struct StreamerHandle {
    cancel: CancellationToken,
    task: JoinHandle<StreamEnd>,
}

/// Supervised streamer tasks, at most one live task per container id.
pub struct StreamerSet {
    runtime: Arc<dyn ContainerRuntime>,
    queue: LogSender,
    tail: usize,
    parent: CancellationToken,
    handles: HashMap<String, StreamerHandle>,
}

impl StreamerSet {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        queue: LogSender,
        tail: usize,
        parent: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            queue,
            tail,
            parent,
            handles: HashMap::new(),
        }
    }

    pub fn is_attached(&self, id: &str) -> bool {
        self.handles
            .get(id)
            .is_some_and(|handle| !handle.task.is_finished())
    }

    /// Start streaming a container. Returns false if a live streamer already
    /// exists for it; a streamer whose task already ended is replaced.
    pub fn attach(&mut self, container: MonitoredContainer) -> bool {
        if self.is_attached(&container.id) {
            log::debug!("{} already has a log streamer", container.name);
            return false;
        }
        let cancel = self.parent.child_token();
        let id = container.id.clone();
        let streamer = LogStreamer::new(
            Arc::clone(&self.runtime),
            self.queue.clone(),
            container,
            self.tail,
        );
        let task = tokio::spawn(streamer.run(cancel.clone()));
        self.handles.insert(id, StreamerHandle { cancel, task });
        true
    }

    /// Cancel and forget the streamer of a container, if any.
    pub fn detach(&mut self, id: &str) -> bool {
        match self.handles.remove(id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn detach_all(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.cancel.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.handles
            .values()
            .filter(|handle| !handle.task.is_finished())
            .count()
    }
}
