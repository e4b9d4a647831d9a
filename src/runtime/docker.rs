//! Docker runtime implementation using bollard.
//!
//! Connects with the default local method (Unix socket on Linux/macOS, named
//! pipe on Windows) and translates bollard errors into [`RuntimeError`].

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogOutput;
use bollard::models::{ContainerSummary, EventMessage, EventMessageTypeEnum};
use bollard::query_parameters::{
    EventsOptionsBuilder, InspectContainerOptionsBuilder, ListContainersOptionsBuilder,
    LogsOptionsBuilder,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;

use super::{
    ContainerRuntime, EventStream, LifecycleAction, LifecycleEvent, LineSplitter, LogStream,
    MonitoredContainer, RuntimeError,
};

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        use bollard::errors::Error;
        match err {
            Error::DockerResponseServerError {
                status_code: 404,
                message,
            } => RuntimeError::NotFound(message),
            Error::RequestTimeoutError => RuntimeError::Timeout,
            e @ (Error::IOError { .. }
            | Error::HyperResponseError { .. }
            | Error::SocketNotFoundError(_)) => RuntimeError::Connection(e.to_string()),
            e => RuntimeError::Other(e.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local daemon and make sure it answers.
    pub async fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        log::info!("Connected to the Docker daemon");
        Ok(Self { docker })
    }
}

fn strip_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

fn summary_to_container(summary: ContainerSummary) -> Option<MonitoredContainer> {
    let id = summary.id?;
    let name = summary
        .names
        .and_then(|names| names.first().map(|n| strip_name(n)))
        .unwrap_or_else(|| id.chars().take(12).collect());
    Some(MonitoredContainer {
        id,
        name,
        labels: summary.labels.unwrap_or_default(),
    })
}

fn event_to_lifecycle(message: EventMessage) -> Option<LifecycleEvent> {
    if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
        return None;
    }
    let actor = message.actor?;
    let container_id = actor.id?;
    let action = LifecycleAction::from(message.action?.as_str());
    Some(LifecycleEvent {
        container_id,
        action,
        attributes: actor.attributes.unwrap_or_default(),
    })
}

/// Keeps stdout and stderr apart so a partial line on one stream is never
/// glued to output from the other.
#[derive(Debug, Default)]
struct FrameSplitter {
    stdout: LineSplitter,
    stderr: LineSplitter,
}

impl FrameSplitter {
    fn push(&mut self, output: LogOutput) -> Vec<String> {
        let (splitter, message): (&mut LineSplitter, bytes::Bytes) = match output {
            LogOutput::StdErr { message } => (&mut self.stderr, message),
            LogOutput::StdOut { message }
            | LogOutput::Console { message }
            | LogOutput::StdIn { message } => (&mut self.stdout, message),
        };
        splitter.push(&message)
    }

    fn finish(&mut self) -> Vec<String> {
        self.stdout
            .finish()
            .into_iter()
            .chain(self.stderr.finish())
            .collect()
    }
}

/// Fractional unix seconds, as the daemon's `since` filter expects.
fn since_param(since: DateTime<Utc>) -> String {
    format!("{}.{:09}", since.timestamp(), since.timestamp_subsec_nanos())
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_running(&self) -> Result<Vec<MonitoredContainer>, RuntimeError> {
        let options = ListContainersOptionsBuilder::new().all(false).build();
        let summaries = self.docker.list_containers(Some(options)).await?;
        Ok(summaries
            .into_iter()
            .filter_map(summary_to_container)
            .collect())
    }

    async fn get_container(&self, id: &str) -> Result<MonitoredContainer, RuntimeError> {
        let options = InspectContainerOptionsBuilder::new().build();
        let info = self.docker.inspect_container(id, Some(options)).await?;
        let name = info
            .name
            .as_deref()
            .map(strip_name)
            .unwrap_or_else(|| id.to_string());
        let labels = info
            .config
            .and_then(|config| config.labels)
            .unwrap_or_default();
        Ok(MonitoredContainer {
            id: info.id.unwrap_or_else(|| id.to_string()),
            name,
            labels,
        })
    }

    fn stream_logs(&self, id: &str, tail: usize) -> LogStream {
        let options = LogsOptionsBuilder::new()
            .follow(true)
            .stdout(true)
            .stderr(true)
            .tail(&tail.to_string())
            .build();
        let frames = self.docker.logs(id, Some(options));

        let lines = futures::stream::unfold(
            (frames, FrameSplitter::default(), false),
            |(mut frames, mut splitter, done)| async move {
                if done {
                    return None;
                }
                match frames.next().await {
                    Some(Ok(output)) => {
                        let lines: Vec<Result<String, RuntimeError>> = splitter
                            .push(output)
                            .into_iter()
                            .map(Ok)
                            .collect();
                        Some((lines, (frames, splitter, false)))
                    }
                    Some(Err(e)) => Some((vec![Err(e.into())], (frames, splitter, true))),
                    None => {
                        let rest = splitter.finish().into_iter().map(Ok).collect();
                        Some((rest, (frames, splitter, true)))
                    }
                }
            },
        );
        Box::pin(lines.flat_map(futures::stream::iter))
    }

    async fn tail_logs(&self, id: &str, lines: usize) -> Result<Vec<String>, RuntimeError> {
        let options = LogsOptionsBuilder::new()
            .follow(false)
            .stdout(true)
            .stderr(true)
            .tail(&lines.to_string())
            .build();
        let mut frames = self.docker.logs(id, Some(options));
        let mut splitter = FrameSplitter::default();
        let mut snapshot = Vec::new();
        while let Some(frame) = frames.next().await {
            snapshot.extend(splitter.push(frame?));
        }
        snapshot.extend(splitter.finish());
        Ok(snapshot)
    }

    fn events(&self, since: Option<DateTime<Utc>>) -> EventStream {
        let mut filters = HashMap::new();
        filters.insert("type", vec!["container"]);
        filters.insert(
            "event",
            vec!["start", "unpause", "die", "stop", "pause", "destroy"],
        );
        let mut options = EventsOptionsBuilder::new().filters(&filters);
        if let Some(since) = since {
            options = options.since(&since_param(since));
        }
        let options = options.build();

        let events = self
            .docker
            .events(Some(options))
            .filter_map(|message| async move {
                match message {
                    Ok(message) => event_to_lifecycle(message).map(Ok),
                    Err(e) => Some(Err(RuntimeError::from(e))),
                }
            });
        Box::pin(events)
    }
}
