use clap::Parser;
use url::Url;

/// Container telemetry agent: streams and classifies container logs, tracks
/// container lifecycle and probes a target service for latency and uptime.
///
/// Every option can also be set through its environment variable; a `.env`
/// file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Credential sent as a bearer token to the ingestion API.
    #[arg(long, env = "RADAR_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// User the reported telemetry belongs to.
    #[arg(long, env = "RADAR_USER_ID")]
    pub user_id: Option<String>,

    /// Base URL of the ingestion API.
    #[arg(long, env = "RADAR_API_URL", default_value = "http://localhost:3000")]
    pub api_url: Url,

    /// Log events endpoint. Defaults to `<api-url>/api/logs`.
    #[arg(long, env = "RADAR_LOGS_URL")]
    pub logs_url: Option<Url>,

    /// Status events endpoint. Defaults to `<api-url>/api/status`.
    #[arg(long, env = "RADAR_STATUS_URL")]
    pub status_url: Option<Url>,

    /// Latency samples endpoint. Defaults to `<api-url>/api/latency`.
    #[arg(long, env = "RADAR_LATENCY_URL")]
    pub latency_url: Option<Url>,

    /// Uptime samples endpoint. Defaults to `<api-url>/api/uptime`.
    #[arg(long, env = "RADAR_UPTIME_URL")]
    pub uptime_url: Option<Url>,

    /// Service probed for latency and uptime. Probing is off when unset.
    #[arg(long, env = "RADAR_TARGET_URL")]
    pub target_url: Option<Url>,

    /// Route discovery path on the target service.
    #[arg(long, env = "RADAR_ROUTES_PATH", default_value = "/debug/routes")]
    pub routes_path: String,

    /// Path requested on the target service by the uptime probe.
    #[arg(long, env = "RADAR_UPTIME_PATH", default_value = "/")]
    pub uptime_path: String,

    /// Comma separated container names to monitor. Empty monitors everything.
    #[arg(long, env = "RADAR_CONTAINERS", default_value = "")]
    pub containers: String,

    /// Lines of history read when attaching to a container.
    #[arg(long, env = "RADAR_TAIL_LINES", default_value_t = 10)]
    pub tail_lines: usize,

    /// Lines fetched after a container exits abnormally.
    #[arg(long, env = "RADAR_AUTOPSY_LINES", default_value_t = 200)]
    pub autopsy_lines: usize,

    /// Parse JSON log lines and use their level field.
    #[arg(long, env = "RADAR_PARSE_JSON", default_value_t = true, action = clap::ArgAction::Set)]
    pub parse_json: bool,

    /// Capacity of the log queue between streamers and the dispatcher.
    #[arg(long, env = "RADAR_QUEUE_CAPACITY", default_value_t = 1000)]
    pub queue_capacity: usize,

    /// Seconds between heartbeats.
    #[arg(long, env = "RADAR_HEARTBEAT_INTERVAL", default_value_t = 60)]
    pub heartbeat_interval: u64,

    /// Seconds between latency probe cycles.
    #[arg(long, env = "RADAR_LATENCY_INTERVAL", default_value_t = 60)]
    pub latency_interval: u64,

    /// Seconds between uptime probes.
    #[arg(long, env = "RADAR_UPTIME_INTERVAL", default_value_t = 60)]
    pub uptime_interval: u64,

    /// Milliseconds to wait between two route probes.
    #[arg(long, env = "RADAR_PROBE_PAUSE_MS", default_value_t = 500)]
    pub probe_pause_ms: u64,

    /// HTTP request timeout in seconds.
    #[arg(long, env = "RADAR_REQUEST_TIMEOUT", default_value_t = 10)]
    pub request_timeout: u64,

    /// First delivery retry delay in milliseconds; doubles on each retry.
    #[arg(long, env = "RADAR_RETRY_BASE_MS", default_value_t = 1000)]
    pub retry_base_ms: u64,

    /// Enable debug logging.
    #[arg(long, env = "RADAR_DEBUG", default_value_t = false, action = clap::ArgAction::Set)]
    pub debug: bool,
}
