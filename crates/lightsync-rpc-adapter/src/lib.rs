//! Ethereum JSON-RPC facade over a light-sync chain client.
//!
//! Requests flow through a fixed list of stages ([`middleware`]): block
//! lookups and `net_version`, block-tag rewriting against the tracked head,
//! state reads from synced slices, local EVM execution, and an optional
//! read-only upstream. [`startup`] brings up identity, client and pipeline;
//! [`server`] exposes the pipeline over HTTP.

pub mod config;
pub mod error;
pub mod head_tracker;
pub mod middleware;
pub mod pipeline;
mod provider_db;
pub mod server;
pub mod startup;
pub mod telemetry;

pub use error::RpcError;
pub use head_tracker::HeadTracker;
pub use pipeline::{build_pipeline, MiddlewarePipeline, PipelineProvider, PipelineSettings};
pub use startup::{ClientFactory, Node, RpcClientFactory, Startup, StartupError, StartupOptions};
