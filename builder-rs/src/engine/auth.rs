use crate::engine::EngineError;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use std::{path::Path, time::{SystemTime, UNIX_EPOCH}};

#[derive(serde::Serialize)]
struct Claims {
    iat: u64,
}

/// HS256 token source for the Engine API. A fresh token is minted for every
/// call; execution clients reject tokens with stale `iat` values.
#[derive(Clone)]
pub struct JwtAuth {
    key: EncodingKey,
}

impl JwtAuth {
    pub fn new(secret: &[u8]) -> Result<Self, EngineError> {
        if secret.len() != 32 {
            return Err(EngineError::Jwt(format!(
                "secret must be 32 bytes, got {}",
                secret.len()
            )))
        }
        Ok(Self { key: EncodingKey::from_secret(secret) })
    }

    pub fn from_hex(hex_secret: &str) -> Result<Self, EngineError> {
        let hex_secret = hex_secret.trim();
        let hex_secret = hex_secret.strip_prefix("0x").unwrap_or(hex_secret);
        let secret = hex::decode(hex_secret).map_err(|err| EngineError::Jwt(err.to_string()))?;
        Self::new(&secret)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            EngineError::Jwt(format!("could not read secret from `{}`: {err}", path.as_ref().display()))
        })?;
        Self::from_hex(&contents)
    }

    pub fn token(&self) -> Result<String, EngineError> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        encode(&Header::new(Algorithm::HS256), &Claims { iat }, &self.key)
            .map_err(|err| EngineError::Jwt(err.to_string()))
    }
}
