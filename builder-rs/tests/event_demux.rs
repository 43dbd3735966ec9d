use axum::{
    body::{Bytes, StreamBody},
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use builder_rs::beacon::{EventChannels, EventDemux, Topic};
use parking_lot::Mutex;
use std::{
    convert::Infallible,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

type EventSender = mpsc::Sender<Result<Bytes, Infallible>>;

#[derive(Clone, Default)]
struct FakeBeaconNode {
    head_streams: Arc<Mutex<Vec<EventSender>>>,
    silent_streams: Arc<Mutex<Vec<EventSender>>>,
    bid_requests: Arc<AtomicU64>,
}

#[derive(serde::Deserialize)]
struct TopicsQuery {
    topics: String,
}

fn head_event(slot: u64) -> Bytes {
    let data = format!(
        r#"{{"slot":"{slot}","block":"0x{block}","state":"0x{state}","epoch_transition":false}}"#,
        block = "9a".repeat(32),
        state = "7b".repeat(32),
    );
    Bytes::from(format!("event: head\ndata: {data}\n\n"))
}

async fn handle_events(
    State(node): State<FakeBeaconNode>,
    Query(query): Query<TopicsQuery>,
) -> Response {
    match query.topics.as_str() {
        "head" => {
            let (sender, receiver) = mpsc::channel(8);
            sender.send(Ok(head_event(10))).await.ok();
            // keep the stream open; the test feeds more events through it
            node.head_streams.lock().push(sender);
            (
                [("content-type", "text/event-stream")],
                StreamBody::new(ReceiverStream::new(receiver)),
            )
                .into_response()
        }
        "execution_payload_bid" => {
            // this node predates the topic
            node.bid_requests.fetch_add(1, Ordering::Relaxed);
            StatusCode::BAD_REQUEST.into_response()
        }
        _ => {
            // other topics connect but stay silent
            let (sender, receiver) = mpsc::channel(1);
            node.silent_streams.lock().push(sender);
            StreamBody::new(ReceiverStream::new(receiver)).into_response()
        }
    }
}

#[tokio::test]
async fn test_unsupported_topic_backs_off_without_disrupting_head() {
    let node = FakeBeaconNode::default();
    let router = Router::new()
        .route("/eth/v1/events", get(handle_events))
        .with_state(node.clone());
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 28660));
    let server = axum::Server::bind(&addr).serve(router.into_make_service());
    tokio::spawn(server);

    let channels = Arc::new(EventChannels::new());
    let mut heads = channels.head.subscribe(Topic::Head.channel_capacity());
    let endpoint = Url::parse("http://127.0.0.1:28660").unwrap();
    let demux = EventDemux::new(endpoint, channels);
    let counters = demux.counters();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = demux.spawn(shutdown_rx);

    // the head stream delivers its first event even though the bid topic was
    // rejected with a 400
    let event = tokio::time::timeout(Duration::from_secs(5), heads.recv())
        .await
        .expect("head event arrives")
        .expect("channel open");
    assert_eq!(event.slot, 10);

    // the rejected topic has been tried exactly once: it is in its long
    // backoff and does not tight-loop
    for _ in 0..20 {
        if node.bid_requests.load(Ordering::Relaxed) > 0 {
            break
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(node.bid_requests.load(Ordering::Relaxed), 1);
    let bid_index = Topic::ALL
        .iter()
        .position(|topic| *topic == Topic::ExecutionPayloadBid)
        .unwrap();
    assert_eq!(counters[bid_index].reconnects.load(Ordering::Relaxed), 1);

    // the still-open head subscription keeps delivering
    let sender = node.head_streams.lock().last().unwrap().clone();
    sender.send(Ok(head_event(11))).await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), heads.recv())
        .await
        .expect("second head event arrives")
        .expect("channel open");
    assert_eq!(event.slot, 11);

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
}
