use axum::{
    extract::Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use beacon_api_client::Error as ApiClientError;
use ethereum_consensus::{
    primitives::{BlsPublicKey, Hash32, Slot},
    Error as ConsensusError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("forkchoice update rejected with status {0}")]
    ForkchoiceRejected(String),
    #[error("forkchoice update did not return a payload id")]
    MissingPayloadId,
    #[error("invalid payload from execution client: {0}")]
    InvalidPayload(String),
}

#[derive(Debug, Error)]
pub enum BuilderApiError {
    #[error("signature verification failed for registration with public key {0}")]
    InvalidRegistration(BlsPublicKey),
    #[error("no bid prepared for slot {0}")]
    NoBidPrepared(Slot),
    #[error("no matching payload for block hash")]
    UnknownBlockHash(Hash32),
    #[error("blinded block does not match the cached payload: {0}")]
    UnblindMismatch(String),
    #[error("beacon node rejected the unblinded block: {0}")]
    PublishRejected(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    BuilderApi(#[from] BuilderApiError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Engine(#[from] crate::engine::EngineError),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Api(#[from] ApiClientError),
    #[error("beacon node request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Hyper(#[from] hyper::Error),
    #[error("unexpected response from beacon node: {0}")]
    UnexpectedResponse(String),
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let code = match self {
            Self::BuilderApi(BuilderApiError::NoBidPrepared(..)) => StatusCode::NO_CONTENT,
            Self::BuilderApi(BuilderApiError::PublishRejected(..)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::BuilderApi(..) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if code == StatusCode::NO_CONTENT {
            return code.into_response()
        }
        (code, Json(ErrorMessage { code: code.as_u16(), message })).into_response()
    }
}
