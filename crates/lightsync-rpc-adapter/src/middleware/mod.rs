//! Request stages composed by the pipeline.

mod block_ref_rewrite;
mod block_resolver;
pub mod params;
mod slice;
mod upstream;
mod vm;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcError;

pub use block_ref_rewrite::{block_param_index, BlockRefRewriteMiddleware};
pub use block_resolver::BlockResolverMiddleware;
pub use slice::SliceMiddleware;
pub use upstream::{is_safe_read_only_passthrough, UpstreamMiddleware};
pub use vm::{StateProvider, VmMiddleware};

/// Outcome of one stage for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// The stage produced the result; later stages are skipped.
    Answered(Value),
    /// Hand the (possibly rewritten) request to the next stage.
    Deferred,
}

/// Per-request mailbox threaded through the stages.
///
/// Stages may rewrite `params`. The result is recorded by the pipeline from
/// the first [`Step::Answered`] and cannot be replaced afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEnvelope {
    pub method: String,
    pub params: Value,
    result: Option<Value>,
}

impl RpcEnvelope {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            result: None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn is_answered(&self) -> bool {
        self.result.is_some()
    }

    /// Returns false, leaving the envelope untouched, if a result is already set.
    pub(crate) fn set_result(&mut self, value: Value) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(value);
        true
    }

    pub fn into_result(self) -> Option<Value> {
        self.result
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str;

    /// Methods this stage is able to answer.
    fn methods(&self) -> &'static [&'static str];

    fn answers(&self, method: &str) -> bool {
        self.methods().contains(&method)
    }

    async fn handle(&self, envelope: &mut RpcEnvelope) -> Result<Step, RpcError>;
}
