//! End-to-end tests of the HTTP and WebSocket transports against an in-process axum server.

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pipescope_core::{
    ConnectionState, Engine, FetchError, HttpSnapshotSource, NodeStatus, PipescopeConfig,
    SnapshotSource, WsTransport,
};

const TOKEN: &str = "e2e-secret";

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn dashboard(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    axum::Json(serde_json::json!({
        "nodes": [
            { "id": "upload", "kind": "source", "status": "success" },
            { "id": "embed", "kind": "process", "status": "running",
              "metrics": { "processed": 3, "total": 10 } },
            { "id": "index", "kind": "output", "status": "idle" }
        ],
        "edges": [
            { "from": "upload", "to": "embed", "isActive": true },
            { "from": "embed", "to": "index", "isActive": false },
            { "from": "embed", "to": "ghost", "isActive": true }
        ],
        "metrics": { "documents": 7 },
        "chartData": [1, 2, 3]
    }))
    .into_response()
}

async fn stream(headers: HeaderMap, ws: WebSocketUpgrade) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(serve_socket)
}

async fn serve_socket(mut socket: WebSocket) {
    let Some(Ok(Message::Text(subscribe))) = socket.recv().await else {
        return;
    };
    let subscribe: serde_json::Value = match serde_json::from_str(subscribe.as_str()) {
        Ok(value) => value,
        Err(_) => return,
    };
    if subscribe["type"] != "subscribe" || subscribe["topic"] != "dashboard" {
        return;
    }

    let frames = [
        r#"{"type":"subscribed","topic":"dashboard"}"#,
        r#"{"type":"generation_progress","session_id":"s1","payload":{"stage":"embed","processed":10}}"#,
        r#"{"type":"edgeActivity","from":"embed","to":"index","isActive":true}"#,
    ];
    for frame in frames {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(_)) = socket.recv().await {}
}

async fn spawn_server() -> SocketAddr {
    let app = Router::new()
        .route("/api/v1/dashboard", get(dashboard))
        .route("/api/v1/broken", get(|| async { "not json" }))
        .route(
            "/api/v1/unavailable",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        )
        .route("/ws/dashboard", get(stream));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn source(addr: SocketAddr, path: &str) -> HttpSnapshotSource {
    HttpSnapshotSource::new(format!("http://{addr}{path}"), Duration::from_secs(5))
        .unwrap()
        .with_token(TOKEN)
}

#[tokio::test]
async fn test_http_source_parses_dashboard() {
    let addr = spawn_server().await;
    let payload = source(addr, "/api/v1/dashboard").fetch().await.unwrap();
    assert_eq!(payload.nodes.len(), 3);
    assert_eq!(payload.nodes[1].status, NodeStatus::Running);
    assert_eq!(payload.edges.len(), 3);
    assert_eq!(payload.chart_data, Some(serde_json::json!([1, 2, 3])));
}

#[tokio::test]
async fn test_http_source_maps_errors() {
    let addr = spawn_server().await;

    let err = source(addr, "/api/v1/unavailable").fetch().await.unwrap_err();
    assert_eq!(err, FetchError::Status { status: 503 });

    let err = source(addr, "/api/v1/broken").fetch().await.unwrap_err();
    assert!(matches!(err, FetchError::Parse { .. }));

    let unauthorized =
        HttpSnapshotSource::new(format!("http://{addr}/api/v1/dashboard"), Duration::from_secs(5))
            .unwrap();
    assert_eq!(
        unauthorized.fetch().await.unwrap_err(),
        FetchError::Status { status: 401 }
    );
}

#[tokio::test]
async fn test_engine_over_real_transports() {
    let addr = spawn_server().await;
    let mut config = PipescopeConfig::default();
    config.snapshot.url = format!("http://{addr}/api/v1/dashboard");
    config.stream.url = format!("ws://{addr}/ws/dashboard");
    config.animation.simulate_progress = false;

    let handle = Engine::start(
        config.clone(),
        Arc::new(source(addr, "/api/v1/dashboard")),
        Arc::new(WsTransport::new(config.stream.url.clone()).with_token(TOKEN)),
    )
    .unwrap();

    let mut rx = handle.watch();
    let view = tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|v| {
            v.connection == ConnectionState::Connected
                && v.edge("embed", "index").is_some_and(|e| e.is_active)
        }),
    )
    .await
    .expect("engine never applied stream events")
    .unwrap()
    .clone();

    let embed = view.node("embed").unwrap();
    assert_eq!(embed.processed, Some(10));
    assert_eq!(embed.status, NodeStatus::Success);
    assert!(view.edge("embed", "ghost").is_none());
    assert_eq!(view.aggregates.metrics, Some(serde_json::json!({ "documents": 7 })));

    handle.shutdown();
    handle.join().await;
    assert_eq!(handle.view().connection, ConnectionState::Disconnected);
}
