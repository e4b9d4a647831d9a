//! The shared bounded queue between log producers and the dispatcher.
//!
//! Producers block when the queue is full; nothing is ever dropped here.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub container_name: String,
    pub raw_line: String,
    pub arrival_order: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("Log queue closed")]
pub struct QueueClosed;

#[derive(Debug)]
pub enum Received {
    Item(LogEvent),
    Timeout,
    Closed,
}

#[derive(Clone)]
pub struct LogSender {
    tx: mpsc::Sender<LogEvent>,
    order: Arc<AtomicU64>,
}

pub struct LogReceiver {
    rx: mpsc::Receiver<LogEvent>,
}

pub fn log_queue(capacity: usize) -> (LogSender, LogReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let sender = LogSender {
        tx,
        order: Arc::new(AtomicU64::new(0)),
    };
    (sender, LogReceiver { rx })
}

impl LogSender {
    /// Enqueue a line, waiting for room if the queue is full.
    pub async fn send(
        &self,
        container_name: &str,
        raw_line: impl Into<String>,
    ) -> Result<(), QueueClosed> {
        let event = LogEvent {
            container_name: container_name.to_string(),
            raw_line: raw_line.into(),
            arrival_order: self.order.fetch_add(1, Ordering::Relaxed),
        };
        self.tx.send(event).await.map_err(|_| QueueClosed)
    }
}

impl LogReceiver {
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Received {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(event)) => Received::Item(event),
            Ok(None) => Received::Closed,
            Err(_) => Received::Timeout,
        }
    }
}
