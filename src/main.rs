//! endpoint-forwarder - health-aware reverse proxy for chat-completion style
//! upstream APIs.
//!
//! Loads a YAML config (`--config`, default `config/endpoint-forwarder.yaml`),
//! starts the health checker and config watcher, and serves until a signal
//! requests a graceful drain-and-shutdown.

use std::process::ExitCode;

use clap::Parser;

use endpoint_forwarder::server::builder::{run_server, ServerOverrides};
use endpoint_forwarder::utils::logging;

#[derive(Parser, Debug)]
#[command(name = "endpoint-forwarder", about, version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "ENDPOINT_FORWARDER_CONFIG", default_value = "config/endpoint-forwarder.yaml")]
    config: String,

    /// Overrides `server.host` from the config file.
    #[arg(long, env = "ENDPOINT_FORWARDER_HOST")]
    host: Option<String>,

    /// Overrides `server.port` from the config file.
    #[arg(long, env = "ENDPOINT_FORWARDER_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let args = Args::parse();
    let overrides = ServerOverrides {
        host: args.host,
        port: args.port,
    };

    match run_server(&args.config, overrides).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
