mod common;

use axum::http::Method;
use bytes::Bytes;
use common::{dead_backend_url, stalled_backend, test_config, MockBackend};
use std::sync::atomic::Ordering;
use tftp_gateway::backend::BackendClient;
use tftp_gateway::common::ErrorKind;

fn backend_for(mock: &MockBackend) -> BackendClient {
    BackendClient::new(&test_config(&mock.url())).unwrap()
}

#[tokio::test]
async fn test_fetch_returns_body() {
    let mock = MockBackend::start().await;
    mock.respond(Method::GET, "/hoge", 200, "hoge");

    let body = backend_for(&mock).fetch("hoge", "127.0.0.1").await.unwrap();

    assert_eq!(body.len(), 4);
    assert_eq!(body, Bytes::from_static(b"hoge"));
}

#[tokio::test]
async fn test_fetch_forwards_client_address() {
    let mock = MockBackend::start().await;
    mock.respond(Method::GET, "/hoge", 200, "hoge");

    backend_for(&mock)
        .fetch("/hoge", "192.0.2.7:4711")
        .await
        .unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::GET);
    assert_eq!(requests[0].header("x-forwarded-for"), Some("192.0.2.7:4711"));
}

#[tokio::test]
async fn test_fetch_missing_object_is_not_found() {
    let mock = MockBackend::start().await;

    let err = backend_for(&mock).fetch("missing", "127.0.0.1").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_fetch_server_error_is_transient() {
    let mock = MockBackend::start().await;
    mock.respond(Method::GET, "/flaky", 503, "try later");

    let mut config = test_config(&mock.url());
    config.backend.retry_attempts = 2;
    config.backend.retry_backoff_ms = 10;
    let backend = BackendClient::new(&config).unwrap();

    let err = backend.fetch("flaky", "127.0.0.1").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Transient);
    // Status errors are never retried, even with retries enabled
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn test_timeouts_are_retried() {
    let (url, accepted) = stalled_backend().await;
    let mut config = test_config(&url);
    config.backend.timeout_ms = 200;
    config.backend.retry_attempts = 2;
    config.backend.retry_backoff_ms = 10;
    let backend = BackendClient::new(&config).unwrap();

    let err = backend.fetch("hoge", "127.0.0.1").await.unwrap_err();

    assert!(err.is_transient(), "unexpected error: {err}");
    assert_eq!(accepted.load(Ordering::SeqCst), 3, "one attempt plus two retries");
}

#[tokio::test]
async fn test_store_timeout_is_retried() {
    let (url, accepted) = stalled_backend().await;
    let mut config = test_config(&url);
    config.backend.timeout_ms = 200;
    config.backend.retry_attempts = 1;
    config.backend.retry_backoff_ms = 10;
    let backend = BackendClient::new(&config).unwrap();

    let err = backend
        .store("fuga", "127.0.0.1", Bytes::from_static(b"data"))
        .await
        .unwrap_err();

    assert!(err.is_transient(), "unexpected error: {err}");
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_fetch_transport_failure() {
    let config = test_config(&dead_backend_url().await);
    let backend = BackendClient::new(&config).unwrap();

    let err = backend.fetch("hoge", "127.0.0.1").await.unwrap_err();

    assert!(err.is_transient(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_fetch_enforces_size_cap() {
    let mock = MockBackend::start().await;
    mock.respond(Method::GET, "/big", 200, vec![7u8; 2048]);

    let mut config = test_config(&mock.url());
    config.transfer.max_transfer_size = 1024;
    let backend = BackendClient::new(&config).unwrap();

    let err = backend.fetch("big", "127.0.0.1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Full);
}

#[tokio::test]
async fn test_store_created() {
    let mock = MockBackend::start().await;
    mock.respond(Method::PUT, "/fuga", 201, "fuga");

    backend_for(&mock)
        .store("fuga", "127.0.0.1", Bytes::from_static(b"hogehoge"))
        .await
        .unwrap();

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    let put = &requests[0];
    assert_eq!(put.method, Method::PUT);
    assert_eq!(put.path, "/fuga");
    assert_eq!(put.body, Bytes::from_static(b"hogehoge"));
    assert_eq!(put.header("content-length"), Some("8"));
    assert_eq!(put.header("x-forwarded-for"), Some("127.0.0.1"));
}

#[tokio::test]
async fn test_store_ok_status_is_success() {
    let mock = MockBackend::start().await;
    mock.respond(Method::PUT, "/replace", 200, "");

    let result = backend_for(&mock)
        .store("replace", "127.0.0.1", Bytes::from_static(b"x"))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_store_rejections() {
    let mock = MockBackend::start().await;
    mock.respond(Method::PUT, "/nocontent", 204, "");
    mock.respond(Method::PUT, "/forbidden", 403, "");
    mock.respond(Method::PUT, "/broken", 500, "");
    let backend = backend_for(&mock);
    let body = Bytes::from_static(b"data");

    // Only 200 and 201 count as stored
    let err = backend.store("nocontent", "127.0.0.1", body.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);

    let err = backend.store("forbidden", "127.0.0.1", body.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Denied);

    let err = backend.store("broken", "127.0.0.1", body.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);

    // Unregistered route answers 404
    let err = backend.store("nowhere", "127.0.0.1", body).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_traversal_is_confined_to_root() {
    let mock = MockBackend::start().await;

    let config = test_config(&format!("{}/objects/", mock.url()));
    let backend = BackendClient::new(&config).unwrap();

    // Not normalized by the caller on purpose
    let _ = backend.fetch("../../etc/passwd", "127.0.0.1").await;

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/objects/etc/passwd");
}
