// SPDX-FileCopyrightText: 2025 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use common::{identity::DeviceIdentity, position::GnssPosition};
use module_core::{
    Event, EventBus, EventKind, EventKindType, Module, Request, Response, payload_ref,
    test_helper::{register_response_event, stop_module, wait_for_event},
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use uplink::{UPLINK_ADDR, Uplink};

const REQ_ID: u32 = 5;
const TEST_ADDR: u32 = 0x77;
const STATUS_BODY: &str = "fleet server up";

/// Shared state of the stub fleet server.
#[derive(Clone, Default)]
struct ServerState {
    positions: Arc<Mutex<Vec<serde_json::Value>>>,
    reject: Arc<AtomicBool>,
}

async fn post_positions(
    State(state): State<ServerState>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    state.positions.lock().unwrap().push(body);
    if state.reject.load(Ordering::SeqCst) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::CREATED
    }
}

/// Binds the stub fleet server to an ephemeral port and returns its base URL.
async fn spawn_server(state: ServerState) -> String {
    let app = Router::new()
        .route("/api/positions", post(post_positions))
        .route("/api/status", get(|| async { STATUS_BODY }))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn test_identity() -> DeviceIdentity {
    DeviceIdentity::new("RIDER_1700000000000abc123")
}

fn fix(latitude: f64) -> GnssPosition {
    GnssPosition::new(
        latitude,
        11.282535,
        4.2,
        8.5,
        Some(81.0),
        None,
        &DateTime::<Utc>::default(),
    )
}

fn create_module(eb: &EventBus, server_url: &str) -> tokio::task::JoinHandle<Result<(), ()>> {
    let mut module = Uplink::new(eb.context(), server_url, Some("linux-gpsd"));
    tokio::spawn(async move { module.run().await })
}

/// Starts the uplink with a canned identity responder and waits until the
/// identity response reached the bus. The uplink consumes events in publish
/// order, so everything published afterwards sees the cached identity.
async fn create_module_with_identity(
    eb: &EventBus,
    server_url: &str,
) -> tokio::task::JoinHandle<Result<(), ()>> {
    register_response_event(
        EventKindType::LoadIdentityRequestEvent,
        Event {
            kind: EventKind::LoadIdentityResponseEvent(Response::new(
                1,
                UPLINK_ADDR,
                Ok(test_identity()),
            )),
        },
        eb.context(),
    )
    .expect("Failed to register identity responder");
    let mut rx = eb.subscribe();
    let handle = create_module(eb, server_url);
    wait_for_event(
        &mut rx,
        Duration::from_millis(200),
        EventKindType::LoadIdentityResponseEvent,
    )
    .await;
    handle
}

async fn wait_for_positions(state: &ServerState, count: usize) -> Vec<serde_json::Value> {
    for _ in 0..50 {
        if state.positions.lock().unwrap().len() >= count {
            return state.positions.lock().unwrap().clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "Server received {} positions, expected {}",
        state.positions.lock().unwrap().len(),
        count
    );
}

#[tokio::test]
#[test_log::test]
async fn successful_send_reports_success_to_the_caller() {
    let state = ServerState::default();
    let server_url = spawn_server(state.clone()).await;
    let eb = EventBus::default();
    let mut handle = create_module_with_identity(&eb, &server_url).await;

    let mut rx = eb.subscribe();
    eb.publish(&Event {
        kind: EventKind::UplinkSendRequestEvent(Arc::new(Request {
            id: REQ_ID,
            sender_addr: TEST_ADDR,
            data: fix(52.026649),
        })),
    });
    let event = wait_for_event(
        &mut rx,
        Duration::from_millis(500),
        EventKindType::UplinkSendResponseEvent,
    )
    .await;
    let resp = payload_ref!(event.kind, EventKind::UplinkSendResponseEvent).unwrap();
    assert_eq!(resp.id, REQ_ID);
    assert_eq!(resp.receiver_addr, TEST_ADDR);
    assert_eq!(resp.data, Ok(201));

    let positions = wait_for_positions(&state, 1).await;
    assert_eq!(positions[0]["driverId"], test_identity().as_str());
    assert_eq!(positions[0]["platform"], "linux-gpsd");
    assert_eq!(positions[0]["isBackground"], false);

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn non_2xx_response_is_a_failure() {
    let state = ServerState::default();
    state.reject.store(true, Ordering::SeqCst);
    let server_url = spawn_server(state.clone()).await;
    let eb = EventBus::default();
    let mut handle = create_module_with_identity(&eb, &server_url).await;

    let mut rx = eb.subscribe();
    eb.publish(&Event {
        kind: EventKind::UplinkSendRequestEvent(Arc::new(Request {
            id: REQ_ID,
            sender_addr: TEST_ADDR,
            data: fix(52.026649),
        })),
    });
    let event = wait_for_event(
        &mut rx,
        Duration::from_millis(500),
        EventKindType::UplinkSendResponseEvent,
    )
    .await;
    let resp = payload_ref!(event.kind, EventKind::UplinkSendResponseEvent).unwrap();
    assert_eq!(resp.data, Err(std::io::ErrorKind::InvalidData));

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn unreachable_server_is_a_failure() {
    let eb = EventBus::default();
    // Port 9 is discard; nothing listens there in the test environment.
    let mut handle = create_module_with_identity(&eb, "http://127.0.0.1:9").await;

    let mut rx = eb.subscribe();
    eb.publish(&Event {
        kind: EventKind::UplinkSendRequestEvent(Arc::new(Request {
            id: REQ_ID,
            sender_addr: TEST_ADDR,
            data: fix(52.026649),
        })),
    });
    let event = wait_for_event(
        &mut rx,
        Duration::from_millis(1000),
        EventKindType::UplinkSendResponseEvent,
    )
    .await;
    let resp = payload_ref!(event.kind, EventKind::UplinkSendResponseEvent).unwrap();
    assert!(resp.data.is_err());

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn batch_of_n_fixes_issues_n_posts_in_delivery_order() {
    let state = ServerState::default();
    let server_url = spawn_server(state.clone()).await;
    let eb = EventBus::default();
    let mut handle = create_module_with_identity(&eb, &server_url).await;

    let batch = vec![fix(52.01), fix(52.02), fix(52.03)];
    eb.publish(&Event {
        kind: EventKind::GnssBatchEvent(Arc::new(batch)),
    });

    let positions = wait_for_positions(&state, 3).await;
    assert_eq!(positions.len(), 3);
    for (body, exp_lat) in positions.iter().zip([52.01, 52.02, 52.03]) {
        assert_eq!(body["driverId"], test_identity().as_str());
        assert_eq!(body["latitude"], exp_lat);
        assert_eq!(body["isBackground"], true);
    }

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn failed_background_sends_are_dropped_but_all_attempted() {
    let state = ServerState::default();
    state.reject.store(true, Ordering::SeqCst);
    let server_url = spawn_server(state.clone()).await;
    let eb = EventBus::default();
    let mut handle = create_module_with_identity(&eb, &server_url).await;

    eb.publish(&Event {
        kind: EventKind::GnssBatchEvent(Arc::new(vec![fix(52.01), fix(52.02)])),
    });

    // Both fixes are attempted even though the server rejects each one.
    let positions = wait_for_positions(&state, 2).await;
    assert_eq!(positions.len(), 2);

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn batch_without_identity_is_dropped() {
    let state = ServerState::default();
    let server_url = spawn_server(state.clone()).await;
    let eb = EventBus::default();
    // No identity responder registered, the module never learns an identity.
    let mut handle = create_module(&eb, &server_url);

    eb.publish(&Event {
        kind: EventKind::GnssBatchEvent(Arc::new(vec![fix(52.01)])),
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(state.positions.lock().unwrap().is_empty());

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn status_probe_returns_the_body_as_text() {
    let state = ServerState::default();
    let server_url = spawn_server(state.clone()).await;
    let eb = EventBus::default();
    let mut handle = create_module_with_identity(&eb, &server_url).await;

    let mut rx = eb.subscribe();
    eb.publish(&Event {
        kind: EventKind::StatusProbeRequestEvent(Request::empty_request(REQ_ID, TEST_ADDR)),
    });
    let event = wait_for_event(
        &mut rx,
        Duration::from_millis(500),
        EventKindType::StatusProbeResponseEvent,
    )
    .await;
    let resp = payload_ref!(event.kind, EventKind::StatusProbeResponseEvent).unwrap();
    assert_eq!(resp.data, Ok(STATUS_BODY.to_string()));

    stop_module(&eb, &mut handle).await;
}

#[tokio::test]
#[test_log::test]
async fn identity_reset_refreshes_the_cached_identity() {
    let state = ServerState::default();
    let server_url = spawn_server(state.clone()).await;
    let eb = EventBus::default();
    let mut handle = create_module_with_identity(&eb, &server_url).await;

    let new_identity = DeviceIdentity::new("RIDER_1800000000000xyz789");
    let mut rx = eb.subscribe();
    eb.publish(&Event {
        kind: EventKind::ResetIdentityResponseEvent(Response::new(
            2,
            0xFF,
            Ok(new_identity.clone()),
        )),
    });
    wait_for_event(
        &mut rx,
        Duration::from_millis(200),
        EventKindType::ResetIdentityResponseEvent,
    )
    .await;

    eb.publish(&Event {
        kind: EventKind::UplinkSendRequestEvent(Arc::new(Request {
            id: REQ_ID,
            sender_addr: TEST_ADDR,
            data: fix(52.026649),
        })),
    });
    let positions = wait_for_positions(&state, 1).await;
    assert_eq!(positions[0]["driverId"], new_identity.as_str());

    stop_module(&eb, &mut handle).await;
}
