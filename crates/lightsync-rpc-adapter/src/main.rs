use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lightsync_rpc_adapter::config::{self, CliArgs};
use lightsync_rpc_adapter::server;
use lightsync_rpc_adapter::startup::{RpcClientFactory, Startup};
use lightsync_rpc_adapter::telemetry::{init_tracing, sanitize_url_for_telemetry};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("lightsync-rpc-adapter failed: {:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = CliArgs::parse();
    let print_effective_config = cli.print_effective_config;
    let runtime = config::load(cli)?;

    if print_effective_config {
        let rendered = serde_json::to_string_pretty(&runtime.effective())
            .context("failed to render effective config")?;
        println!("{rendered}");
        return Ok(());
    }

    let _telemetry = init_tracing(runtime.otel.clone())?;
    info!(
        listen_addr = %runtime.listen_addr,
        rpc_url = %sanitize_url_for_telemetry(&runtime.client.rpc_url),
        upstream = ?runtime.upstream_url.as_deref().map(sanitize_url_for_telemetry),
        slice_depth = runtime.client.slice_depth,
        "Starting lightsync RPC adapter"
    );

    let options = runtime.startup_options()?;
    let node = Startup::new(options, Arc::new(RpcClientFactory)).run().await?;
    info!(peer_id = %node.peer_info.peer_id, "Node started");

    let (local_addr, handle) = server::start(runtime.listen_addr, Arc::clone(&node.pipeline)).await?;
    info!(%local_addr, "Serving JSON-RPC");

    tokio::select! {
        _ = handle.clone().stopped() => {
            error!("JSON-RPC server stopped unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            info!("Shutdown requested");
            if handle.stop().is_err() {
                error!("JSON-RPC server already stopped");
            }
            handle.stopped().await;
        }
    }

    node.shutdown();
    Ok(())
}
