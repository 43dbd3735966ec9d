use crate::{
    dispatch::Dispatcher,
    types::SignedExecutionPayloadBid,
};
use ethereum_consensus::{
    capella::mainnet::Withdrawal,
    primitives::{ExecutionAddress, Hash32, Root, Slot},
};
use futures::StreamExt;
use serde::Deserialize;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{debug, trace, warn};
use url::Url;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
// a beacon node that rejects the subscription outright will keep doing so;
// back off hard instead of tight-looping
pub const UNSUPPORTED_TOPIC_RETRY_DELAY: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topic {
    Head,
    PayloadAttributes,
    Attestation,
    ExecutionPayloadBid,
    ExecutionPayloadEnvelope,
}

impl Topic {
    pub const ALL: [Topic; 5] = [
        Topic::Head,
        Topic::PayloadAttributes,
        Topic::Attestation,
        Topic::ExecutionPayloadBid,
        Topic::ExecutionPayloadEnvelope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::PayloadAttributes => "payload_attributes",
            Self::Attestation => "attestation",
            Self::ExecutionPayloadBid => "execution_payload_bid",
            Self::ExecutionPayloadEnvelope => "execution_payload_envelope",
        }
    }

    pub fn channel_capacity(&self) -> usize {
        match self {
            Self::Head | Self::PayloadAttributes | Self::ExecutionPayloadEnvelope => 16,
            Self::Attestation | Self::ExecutionPayloadBid => 64,
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::Head => 0,
            Self::PayloadAttributes => 1,
            Self::Attestation => 2,
            Self::ExecutionPayloadBid => 3,
            Self::ExecutionPayloadEnvelope => 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadEvent {
    #[serde(with = "crate::serde::as_str")]
    pub slot: Slot,
    pub block: Root,
    pub state: Root,
    #[serde(default)]
    pub epoch_transition: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct PayloadAttributesInner {
    #[serde(with = "crate::serde::as_str")]
    timestamp: u64,
    prev_randao: Hash32,
    suggested_fee_recipient: ExecutionAddress,
    #[serde(default)]
    withdrawals: Vec<Withdrawal>,
    parent_beacon_block_root: Root,
}

#[derive(Debug, Clone, Deserialize)]
struct PayloadAttributesData {
    #[serde(with = "crate::serde::as_str")]
    proposal_slot: Slot,
    #[serde(with = "crate::serde::as_str")]
    proposer_index: u64,
    parent_block_root: Root,
    parent_block_hash: Hash32,
    payload_attributes: PayloadAttributesInner,
}

#[derive(Debug, Clone, Deserialize)]
struct PayloadAttributesWire {
    #[allow(dead_code)]
    #[serde(default)]
    version: Option<String>,
    data: PayloadAttributesData,
}

/// Flattened view of a `payload_attributes` event: everything the payload
/// builder needs to drive the engine.
#[derive(Debug, Clone)]
pub struct PayloadAttributesEvent {
    pub proposal_slot: Slot,
    pub proposer_index: u64,
    pub parent_block_root: Root,
    pub parent_block_hash: Hash32,
    pub timestamp: u64,
    pub prev_randao: Hash32,
    pub suggested_fee_recipient: ExecutionAddress,
    pub withdrawals: Vec<Withdrawal>,
    pub parent_beacon_block_root: Root,
}

impl From<PayloadAttributesWire> for PayloadAttributesEvent {
    fn from(wire: PayloadAttributesWire) -> Self {
        let data = wire.data;
        let attributes = data.payload_attributes;
        Self {
            proposal_slot: data.proposal_slot,
            proposer_index: data.proposer_index,
            parent_block_root: data.parent_block_root,
            parent_block_hash: data.parent_block_hash,
            timestamp: attributes.timestamp,
            prev_randao: attributes.prev_randao,
            suggested_fee_recipient: attributes.suggested_fee_recipient,
            withdrawals: attributes.withdrawals,
            parent_beacon_block_root: attributes.parent_beacon_block_root,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AttestationDataWire {
    #[serde(with = "crate::serde::as_str")]
    slot: Slot,
    beacon_block_root: Root,
}

#[derive(Debug, Clone, Deserialize)]
struct AttestationWire {
    data: AttestationDataWire,
}

#[derive(Debug, Clone)]
pub struct AttestationEvent {
    pub slot: Slot,
    pub beacon_block_root: Root,
}

#[derive(Debug, Clone, Deserialize)]
struct EnvelopeMessageWire {
    #[serde(with = "crate::serde::as_str")]
    builder_index: u64,
    beacon_block_root: Root,
    #[serde(with = "crate::serde::as_str")]
    slot: Slot,
}

#[derive(Debug, Clone, Deserialize)]
struct EnvelopeWire {
    message: EnvelopeMessageWire,
}

/// Summary of a revealed envelope observed on the network.
#[derive(Debug, Clone)]
pub struct EnvelopeEvent {
    pub slot: Slot,
    pub builder_index: u64,
    pub beacon_block_root: Root,
}

pub struct EventChannels {
    pub head: Dispatcher<HeadEvent>,
    pub payload_attributes: Dispatcher<PayloadAttributesEvent>,
    pub attestations: Dispatcher<AttestationEvent>,
    pub bids: Dispatcher<SignedExecutionPayloadBid>,
    pub envelopes: Dispatcher<EnvelopeEvent>,
}

impl Default for EventChannels {
    fn default() -> Self {
        Self::new()
    }
}

impl EventChannels {
    pub fn new() -> Self {
        Self {
            head: Dispatcher::new(),
            payload_attributes: Dispatcher::new(),
            attestations: Dispatcher::new(),
            bids: Dispatcher::new(),
            envelopes: Dispatcher::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TopicCounters {
    pub decoded: AtomicU64,
    pub dropped: AtomicU64,
    pub reconnects: AtomicU64,
}

enum StreamEnd {
    Disconnected,
    Unsupported,
    Transport(String),
}

/// One long-lived server-sent-event subscription per topic, each with its own
/// reconnect loop so an unsupported topic cannot starve the others.
pub struct EventDemux {
    endpoint: Url,
    client: reqwest::Client,
    channels: std::sync::Arc<EventChannels>,
    counters: std::sync::Arc<[TopicCounters; 5]>,
}

impl EventDemux {
    pub fn new(endpoint: Url, channels: std::sync::Arc<EventChannels>) -> Self {
        Self {
            endpoint,
            client: reqwest::Client::new(),
            channels,
            counters: std::sync::Arc::new(Default::default()),
        }
    }

    pub fn counters(&self) -> std::sync::Arc<[TopicCounters; 5]> {
        self.counters.clone()
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let tasks = Topic::ALL.map(|topic| {
                let demux = EventDemuxTopic {
                    endpoint: self.endpoint.clone(),
                    client: self.client.clone(),
                    channels: self.channels.clone(),
                    counters: self.counters.clone(),
                    topic,
                };
                tokio::spawn(demux.run(shutdown.clone()))
            });
            futures::future::join_all(tasks).await;
        })
    }
}

struct EventDemuxTopic {
    endpoint: Url,
    client: reqwest::Client,
    channels: std::sync::Arc<EventChannels>,
    counters: std::sync::Arc<[TopicCounters; 5]>,
    topic: Topic,
}

impl EventDemuxTopic {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let topic = self.topic;
        loop {
            let delay = tokio::select! {
                end = self.subscribe_once() => {
                    self.counters[topic.index()].reconnects.fetch_add(1, Ordering::Relaxed);
                    match end {
                        StreamEnd::Disconnected => {
                            debug!(topic = topic.as_str(), "event stream closed; reconnecting");
                            DEFAULT_RETRY_DELAY
                        }
                        StreamEnd::Unsupported => {
                            warn!(topic = topic.as_str(), "topic not supported by beacon node");
                            UNSUPPORTED_TOPIC_RETRY_DELAY
                        }
                        StreamEnd::Transport(err) => {
                            warn!(topic = topic.as_str(), %err, "event stream error; reconnecting");
                            DEFAULT_RETRY_DELAY
                        }
                    }
                }
                _ = shutdown.changed() => return,
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    // Runs a single subscription to completion. The response is fully dropped
    // before the caller sleeps, so only one connection per topic is ever live.
    async fn subscribe_once(&self) -> StreamEnd {
        let url = match self.endpoint.join(&format!("/eth/v1/events?topics={}", self.topic.as_str()))
        {
            Ok(url) => url,
            Err(err) => return StreamEnd::Transport(err.to_string()),
        };
        let response = match self
            .client
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => return StreamEnd::Transport(err.to_string()),
        };
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            return StreamEnd::Unsupported
        }
        if !response.status().is_success() {
            return StreamEnd::Transport(format!("status {}", response.status()));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = Vec::new();
        let mut data_lines: Vec<String> = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => return StreamEnd::Transport(err.to_string()),
            };
            buffer.extend_from_slice(&chunk);
            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line[..line.len() - 1]);
                let line = line.trim_end_matches('\r');
                if let Some(data) = line.strip_prefix("data:") {
                    data_lines.push(data.trim_start().to_string());
                } else if line.is_empty() && !data_lines.is_empty() {
                    let data = data_lines.join("\n");
                    data_lines.clear();
                    self.dispatch(&data);
                }
                // `event:` and comment lines carry no information we do not
                // already have from the single-topic subscription
            }
        }
        StreamEnd::Disconnected
    }

    fn dispatch(&self, data: &str) {
        let outcome = match self.topic {
            Topic::Head => serde_json::from_str::<HeadEvent>(data).map(|event| {
                trace!(slot = event.slot, "head event");
                self.channels.head.fire(event)
            }),
            Topic::PayloadAttributes => {
                serde_json::from_str::<PayloadAttributesWire>(data).map(|wire| {
                    let event = PayloadAttributesEvent::from(wire);
                    trace!(slot = event.proposal_slot, "payload attributes event");
                    self.channels.payload_attributes.fire(event)
                })
            }
            Topic::Attestation => serde_json::from_str::<AttestationWire>(data).map(|wire| {
                self.channels.attestations.fire(AttestationEvent {
                    slot: wire.data.slot,
                    beacon_block_root: wire.data.beacon_block_root,
                })
            }),
            Topic::ExecutionPayloadBid => {
                serde_json::from_str::<SignedExecutionPayloadBid>(data)
                    .map(|bid| self.channels.bids.fire(bid))
            }
            Topic::ExecutionPayloadEnvelope => {
                serde_json::from_str::<EnvelopeWire>(data).map(|wire| {
                    self.channels.envelopes.fire(EnvelopeEvent {
                        slot: wire.message.slot,
                        builder_index: wire.message.builder_index,
                        beacon_block_root: wire.message.beacon_block_root,
                    })
                })
            }
        };
        match outcome {
            Ok(()) => {
                self.counters[self.topic.index()].decoded.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.counters[self.topic.index()].dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic = self.topic.as_str(), %err, %data, "dropping malformed event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_head_event() {
        let data = format!(
            r#"{{"slot":"10","block":"0x{}","state":"0x{}","epoch_transition":false,"execution_optimistic":false}}"#,
            "9a".repeat(32),
            "7b".repeat(32),
        );
        let event: HeadEvent = serde_json::from_str(&data).unwrap();
        assert_eq!(event.slot, 10);
        assert!(!event.epoch_transition);
    }

    #[test]
    fn test_decode_payload_attributes_event() {
        let data = format!(
            r#"{{"version":"fulu","data":{{"proposer_index":"123","proposal_slot":"10","parent_block_number":"9","parent_block_root":"0x{root}","parent_block_hash":"0x{hash}","payload_attributes":{{"timestamp":"1697757948","prev_randao":"0x{root}","suggested_fee_recipient":"0x{addr}","withdrawals":[],"parent_beacon_block_root":"0x{root}"}}}}}}"#,
            root = "11".repeat(32),
            hash = "22".repeat(32),
            addr = "33".repeat(20),
        );
        let wire: PayloadAttributesWire = serde_json::from_str(&data).unwrap();
        let event = PayloadAttributesEvent::from(wire);
        assert_eq!(event.proposal_slot, 10);
        assert_eq!(event.proposer_index, 123);
        assert_eq!(event.timestamp, 1697757948);
        assert!(event.withdrawals.is_empty());
    }

    #[test]
    fn test_malformed_event_is_rejected() {
        assert!(serde_json::from_str::<HeadEvent>(r#"{"slot":10}"#).is_err());
        assert!(serde_json::from_str::<PayloadAttributesWire>("{}").is_err());
    }

    #[test]
    fn test_topic_capacities() {
        assert_eq!(Topic::Head.channel_capacity(), 16);
        assert_eq!(Topic::ExecutionPayloadEnvelope.channel_capacity(), 16);
        assert_eq!(Topic::ExecutionPayloadBid.channel_capacity(), 64);
        assert_eq!(Topic::Attestation.channel_capacity(), 64);
    }
}
