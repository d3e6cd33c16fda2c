//! End-to-end tests: relay in front of a mocked metadata service and a mocked file store.

use crate::test_utils::{
    TEST_API_KEY, capture_events, create_test_config, create_test_server, spawn_relay, unused_address,
};
use axum::{
    Router,
    body::Body,
    http::{Method, StatusCode},
    routing::get,
};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Level;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type Chunk = Result<Bytes, std::io::Error>;

/// Metadata service answering `/failas/<id>/downloadProxyInformation` with `descriptor`.
async fn mock_metadata(id: &str, descriptor: serde_json::Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/failas/{id}/downloadProxyInformation")))
        .and(header("authorization", format!("Bearer {TEST_API_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(descriptor))
        .expect(1)
        .mount(&server)
        .await;
    server
}

/// File store whose single response body is fed chunk by chunk through the returned sender.
async fn spawn_channel_upstream() -> (SocketAddr, mpsc::Sender<Chunk>) {
    let (tx, rx) = mpsc::channel::<Chunk>(4);
    let rx = Arc::new(Mutex::new(Some(rx)));

    let router = Router::new().route(
        "/file",
        get(move || {
            let rx = rx.clone();
            async move {
                let rx = rx.lock().unwrap().take().expect("file requested more than once");
                Body::from_stream(ReceiverStream::new(rx))
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    (addr, tx)
}

fn http_client() -> reqwest::Client {
    crate::upstream::install_crypto_provider();
    reqwest::Client::new()
}

#[test_log::test(tokio::test)]
async fn test_download_forwards_descriptor_headers_and_body() {
    let body: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/y"))
        .and(header("x-storage-token", "signed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/octet-stream")
                .set_body_bytes(body.clone()),
        )
        .expect(1)
        .mount(&storage)
        .await;

    let metadata = mock_metadata(
        "17",
        serde_json::json!({
            "fileUrl": format!("{}/y", storage.uri()),
            "headers": {"X-Storage-Token": "signed"},
            "contentType": "application/pdf",
            "fileName": "a b.pdf"
        }),
    )
    .await;

    let server = create_test_server(create_test_config(&metadata.uri()));
    let response = server.get("/17").await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.header("content-type"), "application/pdf");
    assert_eq!(response.header("content-disposition"), r#"inline; filename="a%20b.pdf""#);
    assert_eq!(response.as_bytes().as_ref(), body.as_slice());
}

#[test_log::test(tokio::test)]
async fn test_head_returns_descriptor_headers_without_body() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .expect(1)
        .mount(&storage)
        .await;

    let metadata = mock_metadata(
        "17",
        serde_json::json!({
            "fileUrl": format!("{}/doc", storage.uri()),
            "contentType": "application/pdf",
            "contentLength": 5,
            "fileName": "report.pdf"
        }),
    )
    .await;

    let server = create_test_server(create_test_config(&metadata.uri()));
    let response = server.method(Method::HEAD, "/17").await;

    response.assert_status(StatusCode::OK);
    assert_eq!(response.header("content-type"), "application/pdf");
    assert_eq!(response.header("content-length"), "5");
    assert_eq!(response.header("content-disposition"), r#"inline; filename="report.pdf""#);
    assert!(response.as_bytes().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_composite_download_sets_content_length() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello".to_vec()))
        .mount(&storage)
        .await;

    let metadata = mock_metadata(
        "3/8",
        serde_json::json!({
            "fileUrl": format!("{}/doc", storage.uri()),
            "contentLength": 5
        }),
    )
    .await;

    let addr = spawn_relay(create_test_config(&metadata.uri())).await;
    let response = http_client().get(format!("http://{addr}/3/8")).send().await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-length").unwrap(), "5");
    assert!(response.headers().get("content-disposition").is_none());
    assert_eq!(response.bytes().await.unwrap().as_ref(), b"hello");
}

#[test_log::test(tokio::test)]
async fn test_metadata_error_is_relayed_and_file_never_fetched() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&storage)
        .await;

    let metadata = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/failas/99/downloadProxyInformation"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&metadata)
        .await;

    let server = create_test_server(create_test_config(&metadata.uri()));
    let response = server.get("/99").await;

    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.text(), "not found");
}

#[test_log::test(tokio::test)]
async fn test_file_error_is_relayed_without_descriptor_headers() {
    let storage = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&storage)
        .await;

    let metadata = mock_metadata(
        "5",
        serde_json::json!({
            "fileUrl": format!("{}/secret", storage.uri()),
            "contentType": "application/pdf",
            "fileName": "x.pdf"
        }),
    )
    .await;

    let server = create_test_server(create_test_config(&metadata.uri()));
    let response = server.get("/5").await;

    response.assert_status(StatusCode::FORBIDDEN);
    assert_eq!(response.text(), "forbidden");
    assert!(response.headers().get("content-disposition").is_none());
}

#[tokio::test]
async fn test_unreachable_metadata_service_is_internal_error() {
    let (events, _guard) = capture_events();
    let dead = unused_address().await;

    let server = create_test_server(create_test_config(&format!("http://{dead}")));
    let response = server.get("/1").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "Internal proxy error");
    assert!(
        events.contains(Level::ERROR, "Proxy error: Upstream metadata lookup failed"),
        "transport failure was not logged: {:?}",
        events.messages()
    );
}

#[tokio::test]
async fn test_unreachable_file_store_is_internal_error() {
    let (events, _guard) = capture_events();
    let dead = unused_address().await;
    let metadata = mock_metadata("1", serde_json::json!({ "fileUrl": format!("http://{dead}/gone") })).await;

    let server = create_test_server(create_test_config(&metadata.uri()));
    let response = server.get("/1").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "Internal proxy error");
    assert!(
        events.contains(Level::ERROR, "Proxy error: Upstream file fetch failed"),
        "transport failure was not logged: {:?}",
        events.messages()
    );
}

#[test_log::test(tokio::test)]
async fn test_malformed_descriptor_is_internal_error() {
    let metadata = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"contentType": "text/plain"}"#))
        .mount(&metadata)
        .await;

    let server = create_test_server(create_test_config(&metadata.uri()));
    let response = server.get("/1").await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "Internal proxy error");
}

#[test_log::test(tokio::test)]
async fn test_body_reaches_client_before_upstream_finishes() {
    let (upstream, tx) = spawn_channel_upstream().await;
    let metadata = mock_metadata("1", serde_json::json!({ "fileUrl": format!("http://{upstream}/file") })).await;
    let addr = spawn_relay(create_test_config(&metadata.uri())).await;

    let request = http_client().get(format!("http://{addr}/1")).send();
    tx.send(Ok(Bytes::from_static(b"first"))).await.unwrap();
    let mut response = request.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The upstream body is still open here; the first chunk must already be readable
    let first = tokio::time::timeout(Duration::from_secs(5), response.chunk())
        .await
        .expect("first chunk was held back until the upstream finished")
        .unwrap()
        .unwrap();
    assert_eq!(first.as_ref(), b"first");

    tx.send(Ok(Bytes::from_static(b"second"))).await.unwrap();
    drop(tx);

    let mut rest = Vec::new();
    while let Some(chunk) = response.chunk().await.unwrap() {
        rest.extend_from_slice(&chunk);
    }
    assert_eq!(rest, b"second");
}

#[tokio::test]
async fn test_upstream_failure_mid_stream_aborts_client_response() {
    let (events, _guard) = capture_events();
    let (upstream, tx) = spawn_channel_upstream().await;
    let metadata = mock_metadata("2", serde_json::json!({ "fileUrl": format!("http://{upstream}/file") })).await;
    let addr = spawn_relay(create_test_config(&metadata.uri())).await;

    let request = http_client().get(format!("http://{addr}/2")).send();
    tx.send(Ok(Bytes::from_static(b"partial"))).await.unwrap();
    let response = request.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tx.send(Err(std::io::Error::other("disk went away"))).await.unwrap();
    drop(tx);

    let result = tokio::time::timeout(Duration::from_secs(5), response.bytes())
        .await
        .expect("client response was neither completed nor aborted");
    assert!(result.is_err(), "truncated body must not look complete");
    assert!(
        events.contains(Level::ERROR, "Stream error"),
        "mid-stream failure was not logged: {:?}",
        events.messages()
    );
}

#[test_log::test(tokio::test)]
async fn test_client_disconnect_cancels_upstream_transfer() {
    let (upstream, tx) = spawn_channel_upstream().await;
    let metadata = mock_metadata("3", serde_json::json!({ "fileUrl": format!("http://{upstream}/file") })).await;
    let addr = spawn_relay(create_test_config(&metadata.uri())).await;

    let request = http_client().get(format!("http://{addr}/3")).send();
    tx.send(Ok(Bytes::from_static(b"start"))).await.unwrap();
    let response = request.await.unwrap();
    drop(response);

    // Once the relay drops its upstream response the channel receiver goes away with it
    let chunk = Bytes::from(vec![0u8; 64 * 1024]);
    let cancelled = tokio::time::timeout(Duration::from_secs(10), async {
        while tx.send(Ok(chunk.clone())).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(cancelled.is_ok(), "upstream transfer kept running after the client left");
}
