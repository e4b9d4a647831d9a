use std::time::Duration;

use tokio_util::sync::CancellationToken;
use url::Url;

use super::{next_tick, ticker};
use crate::delivery::{DeliveryClient, UptimeSample};

/// Single-request availability probe: a 2xx answer is 100% up, anything
/// else (including no answer at all) is 0%.
pub struct UptimeProber {
    http: reqwest::Client,
    url: Url,
    delivery: DeliveryClient,
    interval: Duration,
}

impl UptimeProber {
    pub fn new(http: reqwest::Client, url: Url, delivery: DeliveryClient, interval: Duration) -> Self {
        Self {
            http,
            url,
            delivery,
            interval,
        }
    }

    pub async fn check(&self) -> UptimeSample {
        match self.http.get(self.url.clone()).send().await {
            Ok(response) if response.status().is_success() => UptimeSample::UP,
            Ok(response) => {
                log::warn!("{} answered {}", self.url, response.status());
                UptimeSample::DOWN
            }
            Err(e) => {
                log::warn!("{} is unreachable: {e}", self.url);
                UptimeSample::DOWN
            }
        }
    }

    pub async fn run(self, stop: CancellationToken) {
        log::info!("Uptime probing {} every {:?}", self.url, self.interval);
        let mut interval = ticker(self.interval);
        while next_tick(&mut interval, &stop).await {
            let sample = self.check().await;
            let _ = self.delivery.deliver(sample).await;
        }
    }
}
