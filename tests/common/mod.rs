#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tftp_gateway::{Gateway, GatewayConfig};
use tokio::task::JoinHandle;

/// One request as the mock backend saw it.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone, Default)]
struct MockState {
    routes: Arc<Mutex<HashMap<(Method, String), (StatusCode, Bytes)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

/// In-process HTTP object store. Unregistered routes answer 404.
pub struct MockBackend {
    addr: SocketAddr,
    state: MockState,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = MockState::default();
        let app = Router::new().fallback(record).with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: impl Into<Bytes>) {
        self.state.routes.lock().unwrap().insert(
            (method, path.to_string()),
            (StatusCode::from_u16(status).unwrap(), body.into()),
        );
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

async fn record(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Bytes) {
    let path = uri.path().to_string();
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        headers,
        body,
    });

    state
        .routes
        .lock()
        .unwrap()
        .get(&(method, path))
        .cloned()
        .unwrap_or((StatusCode::NOT_FOUND, Bytes::new()))
}

/// An address nothing listens on.
pub async fn dead_backend_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Accepts connections and never answers. Returns the URL and a count of
/// accepted connections.
pub async fn stalled_backend() -> (String, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(stream);
        }
    });

    (format!("http://{}", addr), accepted)
}

/// Collects formatted log lines for assertions. Install with
/// [`capture_logs`] on a current-thread runtime so every task logs into it.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (capture, tracing::subscriber::set_default(subscriber))
}

/// Config tuned for tests: no proxy, no retries, short timers.
pub fn test_config(base_url: &str) -> GatewayConfig {
    let mut config = GatewayConfig::new(base_url);
    config.backend.system_proxy = false;
    config.backend.retry_attempts = 0;
    config.backend.timeout_ms = 5_000;
    config.transfer.timeout_ms = 500;
    config.transfer.retries = 3;
    config
}

pub struct RunningGateway {
    pub gateway: Gateway,
    pub addr: SocketAddr,
    pub task: JoinHandle<anyhow::Result<()>>,
}

pub async fn start_gateway(config: GatewayConfig) -> RunningGateway {
    let gateway = Gateway::new(config).expect("valid config");
    let listener = gateway.bind("127.0.0.1:0").await.expect("bind gateway");
    let addr = listener.local_addr().unwrap();

    let server = gateway.clone();
    let task = tokio::spawn(async move { server.serve(listener).await });

    RunningGateway {
        gateway,
        addr,
        task,
    }
}
