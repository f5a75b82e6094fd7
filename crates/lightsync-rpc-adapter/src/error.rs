use jsonrpsee::types::ErrorObjectOwned;
use lightsync_client::ClientError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const INVALID_PARAMS_CODE: i64 = -32602;
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;
pub const INTERNAL_ERROR_CODE: i64 = -32000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Method-level failure of a request, surfaced to the caller as a JSON-RPC error.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcError(JsonRpcError);

impl RpcError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::json_rpc(INVALID_PARAMS_CODE, message, None)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::json_rpc(
            METHOD_NOT_FOUND_CODE,
            format!("Unsupported method: {method}"),
            None,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::json_rpc(INTERNAL_ERROR_CODE, message, None)
    }

    pub fn json_rpc(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self(JsonRpcError {
            code,
            message: message.into(),
            data,
        })
    }

    pub fn code(&self) -> i64 {
        self.0.code
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.0.data.as_ref()
    }

    pub fn into_json(self) -> JsonRpcError {
        self.0
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.0.message, self.0.code)
    }
}

impl std::error::Error for RpcError {}

impl From<ClientError> for RpcError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Upstream { code, message } => Self::json_rpc(code, message, None),
            other => Self::internal(format!("chain client: {other}")),
        }
    }
}

impl From<RpcError> for ErrorObjectOwned {
    fn from(err: RpcError) -> Self {
        let JsonRpcError {
            code,
            message,
            data,
        } = err.0;
        let code = i32::try_from(code).unwrap_or(INTERNAL_ERROR_CODE as i32);
        ErrorObjectOwned::owned(code, message, data)
    }
}
