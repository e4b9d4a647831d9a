use std::time::Duration;

use url::Url;

use crate::cli::Args;
use crate::delivery::{Endpoints, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("RADAR_API_KEY is required")]
    MissingApiKey,
    #[error("Invalid URL for {0}: {1}")]
    Url(&'static str, url::ParseError),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Always ends in `/`.
    pub base: Url,
    pub routes: Url,
    pub uptime: Url,
}

impl ProbeTarget {
    /// URL of a route path as declared by the target, below its base.
    pub fn route_url(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base.join(path.trim_start_matches('/'))
    }
}

/// Agent configuration, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub user_id: Option<String>,
    pub endpoints: Endpoints,
    pub target: Option<ProbeTarget>,
    pub allow_list: Vec<String>,
    pub tail_lines: usize,
    pub autopsy_lines: usize,
    pub parse_json: bool,
    pub queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub latency_interval: Duration,
    pub uptime_interval: Duration,
    pub probe_pause: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub debug: bool,
}

pub fn parse_allow_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// A copy of `url` whose path ends in `/`, so joins extend it.
fn as_base(url: &Url) -> Url {
    let mut base = url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

/// Resolve `path` below `base`, keeping any path prefix `base` carries.
fn join(base: &Url, path: &str, what: &'static str) -> Result<Url, ConfigError> {
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ConfigError::Url(what, e))
}

fn non_zero_secs(secs: u64, what: &'static str) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::Zero(what));
    }
    Ok(Duration::from_secs(secs))
}

impl TryFrom<Args> for AgentConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let api_key = args
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let api_base = as_base(&args.api_url);
        let endpoints = Endpoints {
            logs: match args.logs_url {
                Some(url) => url,
                None => join(&api_base, "api/logs", "logs endpoint")?,
            },
            status: match args.status_url {
                Some(url) => url,
                None => join(&api_base, "api/status", "status endpoint")?,
            },
            latency: match args.latency_url {
                Some(url) => url,
                None => join(&api_base, "api/latency", "latency endpoint")?,
            },
            uptime: match args.uptime_url {
                Some(url) => url,
                None => join(&api_base, "api/uptime", "uptime endpoint")?,
            },
        };

        let target = match args.target_url {
            Some(target) => {
                let base = as_base(&target);
                Some(ProbeTarget {
                    routes: join(&base, &args.routes_path, "routes path")?,
                    uptime: join(&base, &args.uptime_path, "uptime path")?,
                    base,
                })
            }
            None => None,
        };

        if args.queue_capacity == 0 {
            return Err(ConfigError::Zero("RADAR_QUEUE_CAPACITY"));
        }

        Ok(Self {
            api_key,
            user_id: args.user_id.filter(|id| !id.trim().is_empty()),
            endpoints,
            target,
            allow_list: parse_allow_list(&args.containers),
            tail_lines: args.tail_lines,
            autopsy_lines: args.autopsy_lines,
            parse_json: args.parse_json,
            queue_capacity: args.queue_capacity,
            heartbeat_interval: non_zero_secs(args.heartbeat_interval, "RADAR_HEARTBEAT_INTERVAL")?,
            latency_interval: non_zero_secs(args.latency_interval, "RADAR_LATENCY_INTERVAL")?,
            uptime_interval: non_zero_secs(args.uptime_interval, "RADAR_UPTIME_INTERVAL")?,
            probe_pause: Duration::from_millis(args.probe_pause_ms),
            request_timeout: non_zero_secs(args.request_timeout, "RADAR_REQUEST_TIMEOUT")?,
            retry: RetryPolicy {
                base_delay: Duration::from_millis(args.retry_base_ms),
                ..RetryPolicy::default()
            },
            debug: args.debug,
        })
    }
}

#[cfg(test)]
pub fn test_config(extra: &[&str]) -> AgentConfig {
    use clap::Parser;
    let mut argv = vec!["radar-agent", "--api-key", "test-key"];
    argv.extend_from_slice(extra);
    AgentConfig::try_from(Args::parse_from(argv)).expect("valid test config")
}
