use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use agent::{Agent, AgentError};
use config::AgentConfig;
use delivery::DeliveryClient;
use delivery::http::{HttpTransport, build_client};
use runtime::DockerRuntime;

mod agent;
mod classifier;
mod cli;
mod config;
mod delivery;
mod dispatcher;
mod policy;
mod probes;
mod queue;
mod runtime;
mod signals;
mod status;
mod streamer;
mod watcher;

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

/// How the allow-list reads in the startup log.
fn monitored_scope(allow_list: &[String]) -> String {
    if allow_list.is_empty() {
        "all".to_string()
    } else {
        allow_list.join(", ")
    }
}

async fn start(config: AgentConfig, stop: CancellationToken) -> Result<(), AgentError> {
    let config = Arc::new(config);
    if config.debug {
        log::debug!("Debug logging enabled");
    }
    let runtime = DockerRuntime::connect().await?;
    let http = build_client(config.request_timeout)?;
    let transport = HttpTransport::new(
        http.clone(),
        config.api_key.clone(),
        config.request_timeout,
    );
    let delivery = DeliveryClient::new(
        Arc::new(transport),
        config.endpoints.clone(),
        config.retry,
        config.user_id.clone(),
    );

    log::info!(
        "Shipping telemetry to {} for {} containers",
        config.endpoints.logs,
        monitored_scope(&config.allow_list)
    );

    Agent::new(config, Arc::new(runtime), delivery, http)
        .run(stop)
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    let args = cli::Args::parse();
    init_logging(args.debug);

    let config = match AgentConfig::try_from(args) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", AgentError::from(e));
            return ExitCode::FAILURE;
        }
    };

    let stop = CancellationToken::new();
    if let Err(e) = signals::handle_shutdown(stop.clone()) {
        log::error!("Unable to install signal handlers: {e}");
        return ExitCode::FAILURE;
    }

    match start(config, stop).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
