//! In-process LibreSpeed-style HTTP server for integration tests.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Size of every `garbage.php` and `fast.php` response body.
pub const GARBAGE_BODY: usize = 256 * 1024;

#[derive(Default)]
pub struct ServerState {
    /// Delay before `GET empty.php` answers
    ping_delay: Duration,
    pub pings: AtomicUsize,
    pub uploads: AtomicUsize,
    pub uploaded_bytes: AtomicU64,
    pub upload_content_type: Mutex<Option<String>>,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::with_ping_delay(Duration::ZERO).await
    }

    pub async fn with_ping_delay(ping_delay: Duration) -> Self {
        let state = Arc::new(ServerState {
            ping_delay,
            ..Default::default()
        });

        let app = Router::new()
            .route("/garbage.php", get(garbage))
            .route("/fast.php", get(fast))
            .route("/empty.php", get(ping).post(upload))
            .route("/hang.php", get(hang).post(hang))
            .route("/getIP.php", get(ip_json))
            .route("/getIP-text.php", get(ip_text))
            .route("/status500.php", get(status_500).post(status_500))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    /// Base URL ending in `/`, as used by server descriptors.
    pub fn base(&self) -> String {
        format!("http://{}/", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path)
    }
}

/// Base URL of a port nothing listens on.
pub fn unreachable_base() -> String {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    format!("http://127.0.0.1:{}/", port)
}

async fn garbage() -> Vec<u8> {
    tokio::time::sleep(Duration::from_millis(150)).await;
    vec![0u8; GARBAGE_BODY]
}

async fn fast() -> Vec<u8> {
    vec![0u8; GARBAGE_BODY]
}

async fn ping(State(state): State<Arc<ServerState>>) -> &'static str {
    if !state.ping_delay.is_zero() {
        tokio::time::sleep(state.ping_delay).await;
    }
    state.pings.fetch_add(1, Ordering::SeqCst);
    ""
}

async fn upload(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> &'static str {
    tokio::time::sleep(Duration::from_millis(150)).await;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    *state.upload_content_type.lock().unwrap() = content_type;
    state.uploaded_bytes.fetch_add(body.len() as u64, Ordering::SeqCst);
    state.uploads.fetch_add(1, Ordering::SeqCst);
    ""
}

async fn hang() -> &'static str {
    tokio::time::sleep(Duration::from_secs(120)).await;
    ""
}

async fn ip_json() -> ([(header::HeaderName, &'static str); 1], &'static str) {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"processedString":"127.0.0.1 - localhost","rawIspInfo":{"isp":"loopback"}}"#,
    )
}

async fn ip_text() -> &'static str {
    "127.0.0.1\n"
}

async fn status_500() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}
