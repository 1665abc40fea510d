//! The node binary.
//!
//! Exit codes: 0 on normal shutdown, 1 on configuration errors, 2 on
//! unrecoverable startup failures.

use clap::Parser;
use concord_node::{Node, NodeConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "concord-node", version, about = "Concord federation node")]
struct Args {
    /// Path to the JSON node configuration.
    #[arg(long)]
    config: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match NodeConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %args.config.display(), "configuration error");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "could not start the async runtime");
            return ExitCode::from(2);
        }
    };

    runtime.block_on(async {
        let node = match Node::start(config).await {
            Ok(node) => node,
            Err(e) => {
                error!(error = %e, "startup failed");
                return ExitCode::from(2);
            }
        };
        info!("node started; waiting for shutdown signal");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "signal handler failed");
        }
        node.shutdown().await;
        ExitCode::SUCCESS
    })
}
