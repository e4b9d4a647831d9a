use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub log_message: String,
    pub container_name: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Up,
    Down,
    Heartbeat,
}

impl AsRef<str> for ContainerStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Heartbeat => "heartbeat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub container_name: String,
    pub status: ContainerStatus,
    /// When the status was reported; logged on delivery, not part of the wire format.
    #[serde(skip_serializing, default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(container_name: impl Into<String>, status: ContainerStatus) -> Self {
        Self {
            container_name: container_name.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySample {
    /// The route template as declared by the target, placeholders included.
    pub endpoint: String,
    pub method: String,
    pub latency_ms: u64,
    pub status_code: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeSample {
    pub uptime_percent: u8,
}

impl UptimeSample {
    pub const UP: Self = Self {
        uptime_percent: 100,
    };
    pub const DOWN: Self = Self { uptime_percent: 0 };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Log,
    Status,
    Latency,
    Uptime,
}

impl AsRef<str> for PayloadKind {
    fn as_ref(&self) -> &str {
        match self {
            Self::Log => "log",
            Self::Status => "status",
            Self::Latency => "latency",
            Self::Uptime => "uptime",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DeliveryPayload {
    Log(LogRecord),
    Status(StatusEvent),
    Latency(LatencySample),
    Uptime(UptimeSample),
}

impl DeliveryPayload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Log(_) => PayloadKind::Log,
            Self::Status(_) => PayloadKind::Status,
            Self::Latency(_) => PayloadKind::Latency,
            Self::Uptime(_) => PayloadKind::Uptime,
        }
    }
}

impl From<LogRecord> for DeliveryPayload {
    fn from(record: LogRecord) -> Self {
        Self::Log(record)
    }
}

impl From<StatusEvent> for DeliveryPayload {
    fn from(event: StatusEvent) -> Self {
        Self::Status(event)
    }
}

impl From<LatencySample> for DeliveryPayload {
    fn from(sample: LatencySample) -> Self {
        Self::Latency(sample)
    }
}

impl From<UptimeSample> for DeliveryPayload {
    fn from(sample: UptimeSample) -> Self {
        Self::Uptime(sample)
    }
}
