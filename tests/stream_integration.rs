//! End-to-end tests against an in-process axum SSE backend.
//!
//! These tests verify the stream client over real HTTP:
//! - query parameter encoding as seen by the server
//! - ordered delivery and the `complete` event
//! - decode failures that do not end the stream
//! - connection failures and cancellation
//! - session teardown closing an in-flight stream

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use data_agent_client::Error;
use data_agent_client::session::{SessionCoordinator, SessionEvent, SessionSearch};
use data_agent_client::stream::{Callbacks, NodeResponse, StreamClient, StreamRequest, TextType};
use futures::{Stream, StreamExt, stream};
use serde_json::json;
use tokio::sync::mpsc;

// =============================================================================
// Test Utilities
// =============================================================================

type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

#[derive(Debug)]
enum Callback {
    Message(NodeResponse),
    Error(Error),
    Complete,
}

fn node_event(node_name: &str, text_type: &str, text: &str, complete: bool) -> Event {
    Event::default().data(
        json!({
            "agentId": "42",
            "threadId": "thread-1",
            "nodeName": node_name,
            "textType": text_type,
            "text": text,
            "error": false,
            "complete": complete,
        })
        .to_string(),
    )
}

fn complete_event() -> Event {
    Event::default().event("complete").data("")
}

fn sse<S>(events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = Event> + Send + 'static,
{
    Sse::new(events.map(Ok::<Event, Infallible>))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn scenario_stream(
    State(seen): State<Seen>,
    Query(params): Query<HashMap<String, String>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    seen.lock().unwrap().push(params);
    sse(stream::iter(vec![
        node_event("PlannerNode", "TEXT", "planning", false),
        node_event("SqlGenerateNode", "SQL", "SELECT name FROM customers LIMIT 10", false),
        node_event("SqlExecuteNode", "RESULT_SET", "[]", true),
        complete_event(),
    ]))
}

async fn malformed_stream() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse(stream::iter(vec![
        Event::default().data("{oops"),
        node_event("PlannerNode", "TEXT", "still here", false),
        complete_event(),
    ]))
}

async fn endless_stream() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let first = stream::iter(vec![node_event("PlannerNode", "TEXT", "first", false)]);
    sse(first.chain(stream::pending()))
}

async fn truncated_stream() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sse(stream::iter(vec![node_event("PlannerNode", "TEXT", "partial", false)]))
}

/// Start the fake backend on an ephemeral port and return its base URL.
async fn spawn_backend(path: &str, seen: Seen) -> String {
    let router = match path {
        "malformed" => Router::new().route("/api/stream/search", get(malformed_stream)),
        "endless" => Router::new().route("/api/stream/search", get(endless_stream)),
        "truncated" => Router::new().route("/api/stream/search", get(truncated_stream)),
        "missing" => Router::new(),
        _ => Router::new().route("/api/stream/search", get(scenario_stream)),
    }
    .with_state(seen);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn recording_callbacks() -> (Callbacks, mpsc::UnboundedReceiver<Callback>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (err_tx, done_tx) = (tx.clone(), tx.clone());
    let callbacks = Callbacks::new(move |node| {
        let _ = tx.send(Callback::Message(node));
    })
    .on_error(move |e| {
        let _ = err_tx.send(Callback::Error(e));
    })
    .on_complete(move || {
        let _ = done_tx.send(Callback::Complete);
    });
    (callbacks, rx)
}

fn scenario_request() -> StreamRequest {
    StreamRequest::new("42", "top 10 customers").nl2sql_only(true)
}

// =============================================================================
// Stream client
// =============================================================================

#[tokio::test]
async fn streams_nodes_in_order_and_completes() {
    let seen: Seen = Arc::default();
    let base = spawn_backend("scenario", Arc::clone(&seen)).await;
    let client = StreamClient::new(&base).unwrap();
    let (callbacks, mut rx) = recording_callbacks();

    let handle = client.open(&scenario_request(), callbacks).unwrap();

    let mut types = Vec::new();
    for _ in 0..3 {
        match rx.recv().await {
            Some(Callback::Message(node)) => types.push(node.text_type),
            other => panic!("expected message, got {other:?}"),
        }
    }
    assert_eq!(types, vec![TextType::Text, TextType::Sql, TextType::ResultSet]);
    assert!(matches!(rx.recv().await, Some(Callback::Complete)));

    handle.wait().await;
    assert!(rx.recv().await.is_none());

    let params = seen.lock().unwrap().pop().unwrap();
    assert_eq!(params["agentId"], "42");
    assert_eq!(params["query"], "top 10 customers");
    assert_eq!(params["humanFeedback"], "false");
    assert_eq!(params["rejectedPlan"], "false");
    assert_eq!(params["nl2sqlOnly"], "true");
    assert!(!params.contains_key("threadId"));
    assert!(!params.contains_key("humanFeedbackContent"));
}

#[tokio::test]
async fn malformed_frame_is_reported_and_stream_continues() {
    let base = spawn_backend("malformed", Arc::default()).await;
    let client = StreamClient::new(&base).unwrap();
    let (callbacks, mut rx) = recording_callbacks();

    let handle = client.open(&scenario_request(), callbacks).unwrap();

    assert!(matches!(rx.recv().await, Some(Callback::Error(Error::StreamDecode(_)))));
    match rx.recv().await {
        Some(Callback::Message(node)) => assert_eq!(node.text, "still here"),
        other => panic!("expected message, got {other:?}"),
    }
    assert!(matches!(rx.recv().await, Some(Callback::Complete)));
    handle.wait().await;
}

#[tokio::test]
async fn missing_endpoint_reports_one_transport_error() {
    let base = spawn_backend("missing", Arc::default()).await;
    let client = StreamClient::new(&base).unwrap();
    let (callbacks, mut rx) = recording_callbacks();

    let handle = client.open(&scenario_request(), callbacks).unwrap();

    match rx.recv().await {
        Some(Callback::Error(Error::StreamTransport(message))) => {
            assert!(message.contains("Not found"), "{message}");
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    handle.wait().await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn stream_ending_without_complete_is_a_transport_error() {
    let base = spawn_backend("truncated", Arc::default()).await;
    let client = StreamClient::new(&base).unwrap();
    let (callbacks, mut rx) = recording_callbacks();

    let handle = client.open(&scenario_request(), callbacks).unwrap();

    assert!(matches!(rx.recv().await, Some(Callback::Message(_))));
    assert!(matches!(rx.recv().await, Some(Callback::Error(Error::StreamTransport(_)))));
    handle.wait().await;
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn cancel_closes_an_open_stream() {
    let base = spawn_backend("endless", Arc::default()).await;
    let client = StreamClient::new(&base).unwrap();
    let (callbacks, mut rx) = recording_callbacks();

    let handle = client.open(&scenario_request(), callbacks).unwrap();
    assert!(matches!(rx.recv().await, Some(Callback::Message(_))));

    handle.cancel();
    handle.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("stream task did not exit after cancel");
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn unreachable_backend_reports_transport_error() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = StreamClient::new(format!("http://{addr}")).unwrap();
    let (callbacks, mut rx) = recording_callbacks();
    let handle = client.open(&scenario_request(), callbacks).unwrap();

    assert!(matches!(rx.recv().await, Some(Callback::Error(Error::StreamTransport(_)))));
    handle.wait().await;
}

// =============================================================================
// Session search
// =============================================================================

#[tokio::test]
async fn session_search_records_turn() {
    let base = spawn_backend("scenario", Arc::default()).await;
    let (search, mut events) =
        SessionSearch::new(StreamClient::new(&base).unwrap(), SessionCoordinator::new())
            .with_events();

    search.start("session-a", scenario_request()).unwrap();

    let mut nodes = 0;
    loop {
        match events.recv().await {
            Some(SessionEvent::Node { .. }) => nodes += 1,
            Some(SessionEvent::Completed { session_id }) => {
                assert_eq!(session_id, "session-a");
                break;
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(nodes, 3);

    let state = search.sessions().get_or_create("session-a");
    assert!(!state.is_streaming);
    assert!(!state.has_active_stream);
    assert_eq!(state.node_blocks.len(), 1);
    assert_eq!(state.node_blocks[0].len(), 3);
    assert_eq!(state.last_request, Some(scenario_request()));
}

#[tokio::test]
async fn destroying_a_session_closes_its_stream_only() {
    let base = spawn_backend("endless", Arc::default()).await;
    let (search, mut events) =
        SessionSearch::new(StreamClient::new(&base).unwrap(), SessionCoordinator::new())
            .with_events();

    search.start("A", scenario_request()).unwrap();
    search.start("B", scenario_request()).unwrap();

    // One node from each stream.
    let mut from = Vec::new();
    for _ in 0..2 {
        match events.recv().await {
            Some(event) => from.push(event.session_id().to_string()),
            None => panic!("event channel closed"),
        }
    }
    from.sort();
    assert_eq!(from, vec!["A", "B"]);
    assert_eq!(search.sessions().list_streaming_session_ids(), vec!["A", "B"]);

    let b_before = search.sessions().get_or_create("B");
    assert!(search.sessions().destroy("A"));

    assert_eq!(search.sessions().list_streaming_session_ids(), vec!["B"]);
    assert_eq!(search.sessions().get_or_create("B"), b_before);
    assert!(!search.sessions().get_or_create("A").is_streaming);

    search.sessions().destroy("B");
    assert!(search.sessions().list_streaming_session_ids().is_empty());
}
