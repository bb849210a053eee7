//! Fake jobs backend for transport integration tests.
//!
//! Serves `GET /jobs/{id}` and `GET /ws/jobs/{id}` from a real axum server
//! bound to an ephemeral port, with canned behaviour per job id.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a test-friendly tracing subscriber (once per binary).
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jobwatch_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Start the fake backend and return its address.
pub async fn spawn_backend() -> SocketAddr {
    init_tracing();

    let app = Router::new()
        .route("/jobs/{id}", get(job_handler))
        .route("/ws/jobs/{id}", get(ws_handler));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake backend");
    });

    addr
}

async fn job_handler(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "job-running" => (
            StatusCode::OK,
            [("content-type", "application/json")],
            r#"{"id":"job-running","integration_id":"int-1","status":"running","progress":40,
                "started_at":"2025-03-01T10:00:00Z","logs":["harvesting"]}"#,
        )
            .into_response(),
        "job-done" => (
            StatusCode::OK,
            [("content-type", "application/json")],
            r#"{"id":"job-done","status":"completed","progress":100,
                "completed_at":"2025-03-01T10:05:00Z",
                "result":{"items_harvested":10,"items_processed":10,"items_inserted":9,"errors":["x"]}}"#,
        )
            .into_response(),
        "job-broken" => (StatusCode::INTERNAL_SERVER_ERROR, "database unavailable").into_response(),
        "job-garbage" => (StatusCode::OK, "<html>oops</html>").into_response(),
        _ => (StatusCode::NOT_FOUND, "no such job").into_response(),
    }
}

async fn ws_handler(ws: WebSocketUpgrade, Path(id): Path<String>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, id))
}

/// Canned push scripts:
/// - `job-flaky`: pending, a malformed frame, running(40), then an
///   abrupt drop without a close handshake.
/// - `job-closing`: running(10), then a clean close frame.
/// - anything else: running(5), then hold the socket open.
async fn handle_socket(mut socket: WebSocket, id: String) {
    match id.as_str() {
        "job-flaky" => {
            let _ = send(&mut socket, r#"{"job_id":"job-flaky","status":"pending","progress":0}"#).await;
            let _ = send(&mut socket, "{not json").await;
            let _ = send(&mut socket, r#"{"job_id":"job-flaky","status":"running","progress":40}"#).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(socket);
        }
        "job-closing" => {
            let _ = send(&mut socket, r#"{"job_id":"job-closing","status":"running","progress":10}"#).await;
            let _ = socket.send(Message::Close(None)).await;
        }
        _ => {
            let frame = format!(r#"{{"job_id":"{id}","status":"running","progress":5}}"#);
            let _ = send(&mut socket, &frame).await;
            while let Some(Ok(_)) = socket.recv().await {}
        }
    }
}

async fn send(socket: &mut WebSocket, text: &str) -> Result<(), axum::Error> {
    socket.send(Message::Text(text.to_string().into())).await
}
