//! Container runtime abstraction.
//!
//! The agent never talks to Docker directly outside of [`docker`]. Every other
//! component consumes the [`ContainerRuntime`] trait so that the lifecycle and
//! streaming logic can be exercised against an in-memory runtime in tests.

pub mod docker;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

pub use docker::DockerRuntime;

/// Label that overrides the allow-list for a single container.
pub const MONITOR_LABEL: &str = "monitor";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Unable to reach the container runtime: {0}")]
    Connection(String),
    #[error("Container runtime request timed out")]
    Timeout,
    #[error("Container runtime error: {0}")]
    Other(String),
}

/// A running container as seen by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredContainer {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

impl MonitoredContainer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            labels: HashMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Unpause,
    Die,
    Stop,
    Pause,
    Destroy,
    Other(String),
}

impl From<&str> for LifecycleAction {
    fn from(action: &str) -> Self {
        match action {
            "start" => Self::Start,
            "unpause" => Self::Unpause,
            "die" => Self::Die,
            "stop" => Self::Stop,
            "pause" => Self::Pause,
            "destroy" => Self::Destroy,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A container lifecycle event from the runtime's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub container_id: String,
    pub action: LifecycleAction,
    pub attributes: HashMap<String, String>,
}

impl LifecycleEvent {
    pub fn new(container_id: impl Into<String>, action: LifecycleAction) -> Self {
        Self {
            container_id: container_id.into(),
            action,
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn container_name(&self) -> Option<&str> {
        self.attributes.get("name").map(String::as_str)
    }

    /// Exit code carried by "die" events. Unparseable codes count as abnormal.
    pub fn exit_code(&self) -> Option<i64> {
        self.attributes
            .get("exitCode")
            .map(|code| code.trim().parse().unwrap_or(-1))
    }
}

pub type LogStream = BoxStream<'static, Result<String, RuntimeError>>;
pub type EventStream = BoxStream<'static, Result<LifecycleEvent, RuntimeError>>;

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn list_running(&self) -> Result<Vec<MonitoredContainer>, RuntimeError>;

    async fn get_container(&self, id: &str) -> Result<MonitoredContainer, RuntimeError>;

    /// Follow the live output of a container, starting `tail` lines back.
    /// Yields decoded lines without their trailing newline.
    fn stream_logs(&self, id: &str, tail: usize) -> LogStream;

    /// The last `lines` lines of a container's output, without following.
    async fn tail_logs(&self, id: &str, lines: usize) -> Result<Vec<String>, RuntimeError>;

    /// Subscribe to container lifecycle events. With `since`, events that
    /// happened from that moment on are replayed before live ones.
    fn events(&self, since: Option<DateTime<Utc>>) -> EventStream;
}

/// Splits raw output frames into complete lines, keeping partial lines
/// buffered until their newline arrives.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&line));
        }
        lines
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

#[cfg(test)]
pub mod fake {
    //! In-memory runtime used by the watcher and agent tests.

    use super::*;
    use futures::StreamExt;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type EventReceiver = mpsc::UnboundedReceiver<Result<LifecycleEvent, RuntimeError>>;

    #[derive(Default)]
    pub struct FakeRuntime {
        pub running: Mutex<Vec<MonitoredContainer>>,
        pub snapshots: Mutex<HashMap<String, Vec<String>>>,
        pub tail_requests: Mutex<Vec<(String, usize)>>,
        pub log_senders: Mutex<HashMap<String, mpsc::UnboundedSender<Result<String, RuntimeError>>>>,
        pub stream_requests: Mutex<Vec<String>>,
        pub event_streams: Arc<Mutex<Vec<EventReceiver>>>,
        /// Every event that happened, with its time, for `since` replays.
        pub history: Arc<Mutex<Vec<(DateTime<Utc>, LifecycleEvent)>>>,
        /// Events that happen right after the next listing returns.
        pub after_listing: Mutex<Vec<LifecycleEvent>>,
        pub subscriptions: Mutex<Vec<Option<DateTime<Utc>>>>,
        pub list_error: Mutex<Option<RuntimeError>>,
    }

    impl FakeRuntime {
        pub fn with_running(containers: Vec<MonitoredContainer>) -> Self {
            Self {
                running: Mutex::new(containers),
                ..Default::default()
            }
        }

        pub fn set_running(&self, containers: Vec<MonitoredContainer>) {
            *self.running.lock().unwrap() = containers;
        }

        /// Queue an event stream for the next `events()` subscription.
        pub fn push_event_stream(&self) -> mpsc::UnboundedSender<Result<LifecycleEvent, RuntimeError>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.event_streams.lock().unwrap().push(rx);
            tx
        }

        /// An event that happened while nobody was subscribed.
        pub fn record_event(&self, event: LifecycleEvent) {
            self.history.lock().unwrap().push((Utc::now(), event));
        }

        pub fn log_sender(
            &self,
            id: &str,
        ) -> Option<mpsc::UnboundedSender<Result<String, RuntimeError>>> {
            self.log_senders.lock().unwrap().get(id).cloned()
        }
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn list_running(&self) -> Result<Vec<MonitoredContainer>, RuntimeError> {
            if let Some(err) = self.list_error.lock().unwrap().clone() {
                return Err(err);
            }
            let running = self.running.lock().unwrap().clone();
            let happened: Vec<_> = self.after_listing.lock().unwrap().drain(..).collect();
            for event in happened {
                self.record_event(event);
            }
            Ok(running)
        }

        async fn get_container(&self, id: &str) -> Result<MonitoredContainer, RuntimeError> {
            self.running
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.id == id)
                .cloned()
                .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
        }

        fn stream_logs(&self, id: &str, _tail: usize) -> LogStream {
            let (tx, rx) = mpsc::unbounded_channel();
            self.log_senders.lock().unwrap().insert(id.to_string(), tx);
            self.stream_requests.lock().unwrap().push(id.to_string());
            Box::pin(UnboundedReceiverStream::new(rx))
        }

        async fn tail_logs(&self, id: &str, lines: usize) -> Result<Vec<String>, RuntimeError> {
            self.tail_requests
                .lock()
                .unwrap()
                .push((id.to_string(), lines));
            Ok(self
                .snapshots
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .unwrap_or_default())
        }

        /// Like the Docker daemon, the subscription only opens once the
        /// stream is first polled.
        fn events(&self, since: Option<DateTime<Utc>>) -> EventStream {
            self.subscriptions.lock().unwrap().push(since);
            let history = Arc::clone(&self.history);
            let streams = Arc::clone(&self.event_streams);
            let opened = futures::stream::once(async move {
                let replay: Vec<Result<LifecycleEvent, RuntimeError>> = history
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(at, _)| since.is_some_and(|since| *at >= since))
                    .map(|(_, event)| Ok(event.clone()))
                    .collect();
                let live: EventStream = {
                    let mut streams = streams.lock().unwrap();
                    if streams.is_empty() {
                        Box::pin(futures::stream::pending())
                    } else {
                        Box::pin(UnboundedReceiverStream::new(streams.remove(0)))
                    }
                };
                futures::stream::iter(replay).chain(live)
            })
            .flatten();
            Box::pin(opened)
        }
    }
}
