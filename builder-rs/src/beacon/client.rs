use crate::{
    beacon::{PublishBlock, SubmitBid, SubmitEnvelope},
    chain::ChainSpec,
    types::{
        builder_bid::CONSENSUS_VERSION, SignedBeaconBlockContents, SignedExecutionPayloadBid,
        SignedExecutionPayloadEnvelope,
    },
    Error,
};
use beacon_api_client::mainnet::Client as ApiClient;
use ethereum_consensus::primitives::{Hash32, Root, Slot};
use serde_json::Value;
use std::{collections::HashMap, time::Duration};
use url::Url;

pub const SUBMIT_BID_PATH: &str = "/eth/v1/builder/bids";
pub const SUBMIT_ENVELOPE_PATH: &str = "/eth/v1/builder/payload_envelopes";
pub const PUBLISH_BLOCK_PATH: &str = "/eth/v2/beacon/blocks";

const BLOCK_INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// The winning commitment embedded in a Gloas block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBid {
    pub block_hash: Hash32,
    pub builder_index: u64,
    pub value: u64,
}

/// The subset of a beacon block the builder correlates against its own
/// payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub slot: Slot,
    pub execution_block_hash: Option<Hash32>,
    pub bid: Option<BlockBid>,
}

impl BlockInfo {
    /// The execution block hash this block commits to, whichever form the
    /// fork uses.
    pub fn committed_block_hash(&self) -> Option<&Hash32> {
        self.bid
            .as_ref()
            .map(|bid| &bid.block_hash)
            .or(self.execution_block_hash.as_ref())
    }
}

#[derive(serde::Deserialize)]
struct Wrapped<T> {
    data: T,
}

/// Beacon node client: the standard REST surface via `beacon-api-client`,
/// plus the endpoints it does not model (ePBS submissions, v2 block publish,
/// raw block reads).
#[derive(Clone)]
pub struct BeaconClient {
    api: ApiClient,
    http: reqwest::Client,
    endpoint: Url,
}

impl BeaconClient {
    pub fn new(endpoint: Url) -> Self {
        Self {
            api: ApiClient::new(endpoint.clone()),
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        self.endpoint
            .join(path)
            .map_err(|err| Error::UnexpectedResponse(format!("invalid path `{path}`: {err}")))
    }

    /// Assembles the immutable chain view from the genesis and config
    /// endpoints.
    pub async fn load_chain_spec(&self) -> Result<ChainSpec, Error> {
        let genesis = self.api.get_genesis_details().await?;
        let response = self.http.get(self.url("/eth/v1/config/spec")?).send().await?;
        let response = ensure_success(response).await?;
        let config: Wrapped<HashMap<String, Value>> = response.json().await?;
        let config = config
            .data
            .into_iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(inner) => inner,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect();
        ChainSpec::from_config(
            genesis.genesis_time,
            genesis.genesis_validators_root,
            genesis.genesis_fork_version,
            &config,
        )
    }

    /// `(safe, finalized)` execution block hashes for forkchoice updates.
    /// Unset checkpoints (early devnet slots) resolve to the zero hash.
    pub async fn finality_execution_hashes(&self) -> Result<(Hash32, Hash32), Error> {
        let response = self
            .http
            .get(self.url("/eth/v1/beacon/states/head/finality_checkpoints")?)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let checkpoints: Wrapped<Value> = response.json().await?;
        let justified = checkpoint_root(&checkpoints.data, "current_justified");
        let finalized = checkpoint_root(&checkpoints.data, "finalized");
        let safe_hash = self.execution_hash_of_root(justified).await?;
        let finalized_hash = self.execution_hash_of_root(finalized).await?;
        Ok((safe_hash, finalized_hash))
    }

    async fn execution_hash_of_root(&self, root: Option<Root>) -> Result<Hash32, Error> {
        let Some(root) = root else { return Ok(Hash32::default()) };
        if root == Root::default() {
            return Ok(Hash32::default())
        }
        let info = self.block_info(&crate::serde::root_hex(&root)).await?;
        Ok(info.committed_block_hash().cloned().unwrap_or_default())
    }

    /// Fetches `/eth/v2/beacon/blocks/{id}` and extracts what the builder
    /// correlates on. Bounded by a 5 s timeout; head follow-ups must not lag
    /// into the next slot.
    pub async fn block_info(&self, block_id: &str) -> Result<BlockInfo, Error> {
        let response = self
            .http
            .get(self.url(&format!("/eth/v2/beacon/blocks/{block_id}"))?)
            .timeout(BLOCK_INFO_TIMEOUT)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let block: Wrapped<Value> = response.json().await?;
        parse_block_info(&block.data)
    }
}

fn checkpoint_root(data: &Value, key: &str) -> Option<Root> {
    crate::serde::parse_root(data.get(key)?.get("root")?.as_str()?)
}

pub(crate) fn parse_block_info(data: &Value) -> Result<BlockInfo, Error> {
    let message = data
        .get("message")
        .ok_or_else(|| Error::UnexpectedResponse("block response missing message".to_string()))?;
    let slot = message
        .get("slot")
        .and_then(Value::as_str)
        .and_then(|slot| slot.parse::<Slot>().ok())
        .ok_or_else(|| Error::UnexpectedResponse("block response missing slot".to_string()))?;
    let body = message
        .get("body")
        .ok_or_else(|| Error::UnexpectedResponse("block response missing body".to_string()))?;

    let execution_block_hash = body
        .get("execution_payload")
        .and_then(|payload| payload.get("block_hash"))
        .and_then(Value::as_str)
        .and_then(crate::serde::parse_hash32);

    let bid = body
        .get("signed_execution_payload_bid")
        .and_then(|signed| signed.get("message"))
        .and_then(|bid| {
            Some(BlockBid {
                block_hash: crate::serde::parse_hash32(bid.get("block_hash")?.as_str()?)?,
                builder_index: bid.get("builder_index")?.as_str()?.parse().ok()?,
                value: bid.get("value")?.as_str()?.parse().ok()?,
            })
        });

    Ok(BlockInfo { slot, execution_block_hash, bid })
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response)
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::UnexpectedResponse(format!("{status}: {body}")))
}

#[async_trait::async_trait]
impl SubmitBid for BeaconClient {
    async fn submit_bid(&self, bid: &SignedExecutionPayloadBid) -> Result<(), Error> {
        let response = self.http.post(self.url(SUBMIT_BID_PATH)?).json(bid).send().await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubmitEnvelope for BeaconClient {
    async fn submit_envelope(
        &self,
        envelope: &SignedExecutionPayloadEnvelope,
    ) -> Result<(), Error> {
        let response =
            self.http.post(self.url(SUBMIT_ENVELOPE_PATH)?).json(envelope).send().await?;
        ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PublishBlock for BeaconClient {
    async fn publish_block(&self, contents: &SignedBeaconBlockContents) -> Result<(), Error> {
        let response = self
            .http
            .post(self.url(PUBLISH_BLOCK_PATH)?)
            .header("Eth-Consensus-Version", CONSENSUS_VERSION)
            .json(contents)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }
}
