use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::classifier::Classifier;
use crate::delivery::{DeliveryClient, LogRecord};
use crate::queue::{LogReceiver, Received};

const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Single consumer of the log queue: classifies every line and forwards
/// errors and warnings to the ingestion API.
pub struct Dispatcher {
    rx: LogReceiver,
    classifier: Classifier,
    delivery: DeliveryClient,
    poll_timeout: Duration,
}

impl Dispatcher {
    pub fn new(rx: LogReceiver, classifier: Classifier, delivery: DeliveryClient) -> Self {
        Self {
            rx,
            classifier,
            delivery,
            poll_timeout: POLL_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub async fn run(mut self, stop: CancellationToken) {
        log::info!("Dispatcher started");
        loop {
            match self.rx.recv_timeout(self.poll_timeout).await {
                Received::Item(event) => {
                    let Some(severity) = self.classifier.classify(&event.raw_line) else {
                        continue;
                    };
                    log::debug!(
                        "Line #{} from {} classified as {}",
                        event.arrival_order,
                        event.container_name,
                        severity.as_ref()
                    );
                    let record = LogRecord {
                        log_message: event.raw_line,
                        container_name: event.container_name,
                        severity,
                    };
                    // Failures are logged by the client; the line is dropped.
                    let _ = self.delivery.deliver(record).await;
                }
                Received::Timeout => {
                    if stop.is_cancelled() {
                        break;
                    }
                }
                Received::Closed => {
                    log::info!("Log queue closed");
                    break;
                }
            }
        }
        log::info!("Dispatcher stopped");
    }
}
