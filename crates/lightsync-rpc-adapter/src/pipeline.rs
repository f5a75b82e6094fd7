//! Fixed-order composition of the request stages.

use std::sync::Arc;

use async_trait::async_trait;
use lightsync_client::rpc::JsonRpcApi;
use lightsync_client::ChainClient;
use lightsync_core::{DEFAULT_SLICE_DEPTH, MAINNET_NETWORK_ID};
use serde_json::Value;
use tracing::debug;

use crate::error::RpcError;
use crate::head_tracker::HeadTracker;
use crate::middleware::{
    BlockRefRewriteMiddleware, BlockResolverMiddleware, Middleware, RpcEnvelope, SliceMiddleware,
    StateProvider, Step, UpstreamMiddleware, VmMiddleware,
};

/// Ordered list of stages. The first stage that answers wins.
pub struct MiddlewarePipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new(stages: Vec<Arc<dyn Middleware>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// True if some stage is able to answer `method`.
    pub fn answers(&self, method: &str) -> bool {
        self.stages.iter().any(|stage| stage.answers(method))
    }

    /// Every method some stage answers, in stage order, without duplicates.
    pub fn supported_methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<&'static str> = Vec::new();
        for stage in &self.stages {
            for method in stage.methods() {
                if !methods.contains(method) {
                    methods.push(*method);
                }
            }
        }
        methods
    }

    /// Run `envelope` through the stages until one answers.
    ///
    /// Returns the name of the answering stage. Stage errors abort the run.
    pub async fn dispatch(
        &self,
        envelope: &mut RpcEnvelope,
    ) -> Result<Option<&'static str>, RpcError> {
        for stage in &self.stages {
            match stage.handle(envelope).await? {
                Step::Answered(result) => {
                    envelope.set_result(result);
                    return Ok(Some(stage.name()));
                }
                Step::Deferred => continue,
            }
        }
        Ok(None)
    }

    /// Resolve one request.
    ///
    /// A request no stage answered is `null` when some stage claims the
    /// method, and method-not-found otherwise.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let mut envelope = RpcEnvelope::new(method, params);
        let answered_by = self.dispatch(&mut envelope).await?;

        if let Some(result) = envelope.into_result() {
            debug!(method, stage = answered_by.unwrap_or_default(), "Request answered");
            return Ok(result);
        }
        if self.answers(method) {
            debug!(method, "No stage had a result; returning null");
            return Ok(Value::Null);
        }
        Err(RpcError::method_not_found(method))
    }
}

/// Lets the VM issue nested requests through a pipeline.
pub struct PipelineProvider {
    pipeline: Arc<MiddlewarePipeline>,
}

impl PipelineProvider {
    pub fn new(pipeline: Arc<MiddlewarePipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl StateProvider for PipelineProvider {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.pipeline.request(method, params).await
    }
}

#[derive(Clone)]
pub struct PipelineSettings {
    pub network_id: String,
    pub slice_depth: u8,
    /// Optional upstream node used for reads no local stage could answer.
    pub upstream: Option<Arc<dyn JsonRpcApi>>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            network_id: MAINNET_NETWORK_ID.to_string(),
            slice_depth: DEFAULT_SLICE_DEPTH,
            upstream: None,
        }
    }
}

/// Wire the stages in their fixed order:
/// block resolver, block-ref rewrite, slice, VM, then the optional upstream.
///
/// The VM reads state through a second pipeline made of the same stages
/// minus the VM itself.
pub fn build_pipeline(
    client: Arc<dyn ChainClient>,
    tracker: Arc<HeadTracker>,
    settings: PipelineSettings,
) -> MiddlewarePipeline {
    let resolver: Arc<dyn Middleware> = Arc::new(BlockResolverMiddleware::new(
        Arc::clone(&client),
        settings.network_id,
    ));
    let rewrite: Arc<dyn Middleware> = Arc::new(BlockRefRewriteMiddleware::new(tracker));
    let slice: Arc<dyn Middleware> = Arc::new(SliceMiddleware::new(client, settings.slice_depth));
    let upstream: Option<Arc<dyn Middleware>> = settings
        .upstream
        .map(|api| Arc::new(UpstreamMiddleware::new(api)) as Arc<dyn Middleware>);

    // The VM's provider is this stack without the VM, so execution never nests.
    let mut state_stages = vec![
        Arc::clone(&resolver),
        Arc::clone(&rewrite),
        Arc::clone(&slice),
    ];
    state_stages.extend(upstream.clone());
    let provider = PipelineProvider::new(Arc::new(MiddlewarePipeline::new(state_stages)));
    let vm: Arc<dyn Middleware> = Arc::new(VmMiddleware::new(Arc::new(provider)));

    let mut stages = vec![resolver, rewrite, slice, vm];
    stages.extend(upstream);
    MiddlewarePipeline::new(stages)
}
