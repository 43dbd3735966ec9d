mod auth;
pub mod types;

pub use auth::JwtAuth;

use crate::engine::types::{
    ForkchoiceStateV1, ForkchoiceUpdatedResponse, GetPayloadResponse, PayloadAttributesV3,
    PayloadId, PayloadStatusV1, ENGINE_FORKCHOICE_UPDATED_V3, ENGINE_GET_PAYLOAD_V3,
    ENGINE_GET_PAYLOAD_V4, ENGINE_GET_PAYLOAD_V5, ENGINE_NEW_PAYLOAD_V3, ENGINE_NEW_PAYLOAD_V4,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("engine API error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("could not decode engine API response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unexpected engine API response: {0}")]
    UnexpectedResponse(String),
    #[error("invalid JWT secret: {0}")]
    Jwt(String),
}

impl EngineError {
    pub fn is_unsupported_fork(&self) -> bool {
        matches!(self, Self::Rpc { message, .. } if message.contains("Unsupported fork"))
    }
}

#[derive(serde::Deserialize, Debug)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(serde::Deserialize, Debug)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

/// JSON-RPC client for the authenticated Engine API. A fresh JWT is attached
/// to every call.
#[derive(Clone)]
pub struct EngineClient {
    client: reqwest::Client,
    endpoint: Url,
    auth: JwtAuth,
    rpc_id: Arc<Mutex<u64>>,
}

impl EngineClient {
    pub fn new(endpoint: Url, auth: JwtAuth) -> Self {
        Self { client: reqwest::Client::new(), endpoint, auth, rpc_id: Arc::new(Mutex::new(0)) }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, EngineError> {
        let rpc_id = {
            let mut rpc_id = self.rpc_id.lock();
            *rpc_id += 1;
            *rpc_id
        };
        let call = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": rpc_id,
        });
        let token = self.auth.token()?;
        let response = self
            .client
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {token}"))
            .json(&call)
            .send()
            .await?;
        let response: RpcResponse = response.json().await?;
        if let Some(error) = response.error {
            return Err(EngineError::Rpc { code: error.code, message: error.message })
        }
        let result = response
            .result
            .ok_or_else(|| EngineError::UnexpectedResponse(format!("{method}: empty result")))?;
        serde_json::from_value(result).map_err(From::from)
    }

    pub async fn forkchoice_updated_v3(
        &self,
        state: &ForkchoiceStateV1,
        attributes: Option<&PayloadAttributesV3>,
    ) -> Result<ForkchoiceUpdatedResponse, EngineError> {
        let params = vec![
            serde_json::to_value(state)?,
            attributes.map(serde_json::to_value).transpose()?.unwrap_or(Value::Null),
        ];
        self.call(ENGINE_FORKCHOICE_UPDATED_V3, params).await
    }

    /// Fetches the built payload, walking back from the newest `getPayload`
    /// version when the execution client reports "Unsupported fork".
    pub async fn get_payload(
        &self,
        payload_id: &PayloadId,
    ) -> Result<GetPayloadResponse, EngineError> {
        let params = vec![serde_json::to_value(payload_id)?];
        for method in [ENGINE_GET_PAYLOAD_V5, ENGINE_GET_PAYLOAD_V4, ENGINE_GET_PAYLOAD_V3] {
            match self.call(method, params.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_unsupported_fork() => {
                    debug!(%method, "unsupported fork; falling back to previous version");
                }
                Err(err) => return Err(err),
            }
        }
        Err(EngineError::UnexpectedResponse(
            "no supported engine_getPayload version".to_string(),
        ))
    }

    // Reserved for direct payload import flows.
    pub async fn new_payload_v3(
        &self,
        payload: Value,
        versioned_hashes: Vec<Value>,
        parent_beacon_block_root: Value,
    ) -> Result<PayloadStatusV1, EngineError> {
        self.call(
            ENGINE_NEW_PAYLOAD_V3,
            vec![payload, Value::Array(versioned_hashes), parent_beacon_block_root],
        )
        .await
    }

    pub async fn new_payload_v4(
        &self,
        payload: Value,
        versioned_hashes: Vec<Value>,
        parent_beacon_block_root: Value,
        execution_requests: Vec<Value>,
    ) -> Result<PayloadStatusV1, EngineError> {
        self.call(
            ENGINE_NEW_PAYLOAD_V4,
            vec![
                payload,
                Value::Array(versioned_hashes),
                parent_beacon_block_root,
                Value::Array(execution_requests),
            ],
        )
        .await
    }
}
