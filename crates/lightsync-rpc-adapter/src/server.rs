use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use jsonrpsee::server::{RpcModule, Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde_json::Value;
use tracing::{debug, info, Instrument};

use crate::pipeline::MiddlewarePipeline;
use crate::telemetry::{rpc_server_span, TraceContextLayer};

/// One RPC method per name the pipeline can answer, each dispatched through
/// the full stage list inside an `rpc.request` span.
pub fn rpc_module(pipeline: Arc<MiddlewarePipeline>) -> Result<RpcModule<MiddlewarePipeline>> {
    let methods = pipeline.supported_methods();
    let mut module = RpcModule::from_arc(pipeline);

    for method in methods {
        module
            .register_async_method(method, move |params, pipeline, extensions| {
                let span = rpc_server_span(method, &extensions);
                async move {
                    let params = params.parse::<Value>()?;
                    debug!(method, "RPC request");
                    pipeline
                        .request(method, params)
                        .await
                        .map_err(ErrorObjectOwned::from)
                }
                .instrument(span)
            })
            .with_context(|| format!("failed to register {method}"))?;
    }

    Ok(module)
}

/// Bind the HTTP JSON-RPC server and start serving `pipeline`.
/// Returns the bound address, which differs from `addr` when port 0 is given.
pub async fn start(
    addr: SocketAddr,
    pipeline: Arc<MiddlewarePipeline>,
) -> Result<(SocketAddr, ServerHandle)> {
    let module = rpc_module(pipeline)?;
    let http_middleware = tower::ServiceBuilder::new().layer(TraceContextLayer);
    let server = Server::builder()
        .set_http_middleware(http_middleware)
        .build(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let local_addr = server
        .local_addr()
        .context("failed to read bound address")?;

    let methods = module.method_names().count();
    let handle = server.start(module);
    info!(%local_addr, methods, "JSON-RPC server listening");
    Ok((local_addr, handle))
}
