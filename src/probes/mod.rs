//! Periodic loops that run independently of the log pipeline.

pub mod heartbeat;
pub mod latency;
pub mod uptime;

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub use heartbeat::HeartbeatEmitter;
pub use latency::LatencyProber;
pub use uptime::UptimeProber;

/// An interval that fires immediately and skips ticks missed while a slow
/// cycle was running.
pub(crate) fn ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Waits for the next tick. Returns false once the agent is stopping.
pub(crate) async fn next_tick(interval: &mut Interval, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = interval.tick() => true,
    }
}
