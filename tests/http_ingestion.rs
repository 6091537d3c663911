//! HTTP ingestion end to end through the router.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use pretty_assertions::assert_eq;
use runmetrics_lib::core::codec::{self, PayloadDecryptor, PayloadEncryptor};
use runmetrics_lib::core::{signing, TrustedSubnet};
use runmetrics_lib::server::{create_router, AppState};
use runmetrics_lib::storage::{FileStorage, MetricStorage};
use runmetrics_lib::Metric;
use std::sync::Arc;
use tower::ServiceExt;

const KEY: &str = "ingest-key";

fn router_with(state: AppState) -> Router {
    create_router(state)
}

fn plain_router() -> (Router, Arc<dyn MetricStorage>) {
    let storage: Arc<dyn MetricStorage> = Arc::new(FileStorage::in_memory());
    (router_with(AppState::new(Arc::clone(&storage), "")), storage)
}

fn post_json(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn post_gzip(uri: &str, payload: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(codec::compress(payload).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response {
    app.clone().oneshot(request).await.unwrap()
}

#[tokio::test]
async fn test_gauge_update_then_read() {
    let (app, _) = plain_router();

    let response = send(
        &app,
        post_json("/update/", r#"{"id":"Alloc","type":"gauge","value":200.1}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let echoed: Metric = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(echoed, Metric::gauge("Alloc", 200.1));

    let response = send(&app, get("/value/gauge/Alloc")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "200.1");
}

#[tokio::test]
async fn test_counter_updates_accumulate() {
    let (app, _) = plain_router();

    for _ in 0..2 {
        let response = send(
            &app,
            post_json("/update/", r#"{"id":"PollCount","type":"counter","delta":5}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app, get("/value/counter/PollCount")).await;
    assert_eq!(body_text(response).await, "10");
}

#[tokio::test]
async fn test_gzip_batch_update() {
    let (app, storage) = plain_router();
    let batch = vec![Metric::gauge("Alloc", 1.25), Metric::counter("PollCount", 3)];
    let payload = serde_json::to_vec(&batch).unwrap();

    let response = send(&app, post_gzip("/updates/", &payload)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let echoed: Vec<Metric> = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(echoed, batch);

    let counter = storage.get_metric(Metric::query("PollCount", "counter"), "").await.unwrap();
    assert_eq!(counter.delta, Some(3));
}

#[tokio::test]
async fn test_corrupt_gzip_is_bad_request() {
    let (app, _) = plain_router();
    let request = Request::builder()
        .method("POST")
        .uri("/update/")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from("not gzip at all"))
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wrong_content_type_is_bad_request() {
    let (app, _) = plain_router();
    let request = Request::builder()
        .method("POST")
        .uri("/update/")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from(r#"{"id":"Alloc","type":"gauge","value":1}"#))
        .unwrap();

    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(error["status"], 400);
}

#[tokio::test]
async fn test_path_update() {
    let (app, _) = plain_router();

    let response = send(
        &app,
        Request::builder().method("POST").uri("/update/counter/Hits/4").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");

    let response = send(
        &app,
        Request::builder().method("POST").uri("/update/gauge/Load/0.75").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(body_text(send(&app, get("/value/counter/Hits")).await).await, "4");
    assert_eq!(body_text(send(&app, get("/value/gauge/Load")).await).await, "0.75");
}

#[tokio::test]
async fn test_path_update_errors() {
    let (app, _) = plain_router();
    let post = |uri: &str| {
        Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
    };

    let bad_value = send(&app, post("/update/gauge/Load/high")).await;
    assert_eq!(bad_value.status(), StatusCode::BAD_REQUEST);

    let bad_delta = send(&app, post("/update/counter/Hits/1.5")).await;
    assert_eq!(bad_delta.status(), StatusCode::BAD_REQUEST);

    let unknown = send(&app, post("/update/histogram/Latency/3")).await;
    assert_eq!(unknown.status(), StatusCode::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn test_missing_metric_is_not_found() {
    let (app, _) = plain_router();

    let response = send(&app, get("/value/gauge/Nothing")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, post_json("/value/", r#"{"id":"Nothing","type":"counter"}"#)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_value_json_is_signed() {
    let storage: Arc<dyn MetricStorage> = Arc::new(FileStorage::in_memory());
    let app = router_with(AppState::new(Arc::clone(&storage), KEY));
    storage.save_metric(Metric::counter("PollCount", 12), "").await.unwrap();

    let response =
        send(&app, post_json("/value/", r#"{"id":"PollCount","type":"counter"}"#)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let metric: Metric = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(metric.delta, Some(12));
    assert!(metric.hash.is_some());
    signing::verify(&metric, KEY).unwrap();
}

#[tokio::test]
async fn test_wrong_signature_is_rejected() {
    let storage: Arc<dyn MetricStorage> = Arc::new(FileStorage::in_memory());
    let app = router_with(AppState::new(Arc::clone(&storage), KEY));

    let mut metric = Metric::gauge("Alloc", 5.0);
    signing::attach(&mut metric, "not-the-server-key").unwrap();
    let response = send(&app, post_json("/update/", serde_json::to_vec(&metric).unwrap())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut metric = Metric::gauge("Alloc", 5.0);
    signing::attach(&mut metric, KEY).unwrap();
    let response = send(&app, post_json("/update/", serde_json::to_vec(&metric).unwrap())).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_listing_is_sorted() {
    let (app, storage) = plain_router();
    storage.save_metric(Metric::gauge("Zeta", 1.0), "").await.unwrap();
    storage.save_metric(Metric::counter("Alpha", 2), "").await.unwrap();
    storage.save_metric(Metric::gauge("Mid", 3.5), "").await.unwrap();

    let response = send(&app, get("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
    assert_eq!(body_text(response).await, "Alpha: 2\nMid: 3.5\nZeta: 1\n");
}

#[tokio::test]
async fn test_listing_is_compressed_on_request() {
    let (app, storage) = plain_router();
    for i in 0..10 {
        storage.save_metric(Metric::gauge(format!("Gauge{}", i), f64::from(i)), "").await.unwrap();
    }

    let request = Request::builder()
        .uri("/")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");

    let compressed = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let page = String::from_utf8(codec::decompress(&compressed).unwrap()).unwrap();
    assert!(page.starts_with("Gauge0: 0\n"));
}

#[tokio::test]
async fn test_ping() {
    let (app, _) = plain_router();
    let response = send(&app, get("/ping")).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_trusted_subnet() {
    let storage: Arc<dyn MetricStorage> = Arc::new(FileStorage::in_memory());
    let subnet: TrustedSubnet = "192.168.1.0/24".parse().unwrap();
    let app = router_with(AppState::new(storage, "").with_trusted_subnet(subnet));
    let body = r#"{"id":"Alloc","type":"gauge","value":1}"#;

    let response = send(&app, post_json("/update/", body)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let mut outside = post_json("/update/", body);
    outside.headers_mut().insert("x-real-ip", "10.1.2.3".parse().unwrap());
    assert_eq!(send(&app, outside).await.status(), StatusCode::FORBIDDEN);

    let mut garbage = post_json("/update/", body);
    garbage.headers_mut().insert("x-real-ip", "somewhere".parse().unwrap());
    assert_eq!(send(&app, garbage).await.status(), StatusCode::FORBIDDEN);

    let mut inside = post_json("/update/", body);
    inside.headers_mut().insert("x-real-ip", "192.168.1.42".parse().unwrap());
    assert_eq!(send(&app, inside).await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_encrypted_body_is_decrypted() {
    let mut rng = rand::thread_rng();
    let private = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
    let decryptor = PayloadDecryptor::new(private);
    let encryptor = PayloadEncryptor::new(decryptor.public_key());

    let storage: Arc<dyn MetricStorage> = Arc::new(FileStorage::in_memory());
    let app = router_with(AppState::new(Arc::clone(&storage), "").with_decryptor(decryptor));

    let plaintext = serde_json::to_vec(&Metric::counter("PollCount", 6)).unwrap();
    let ciphertext = encryptor.encrypt(&plaintext).unwrap();
    let response = send(&app, post_gzip("/update/", &ciphertext)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Unencrypted bodies still pass through.
    let response = send(&app, post_gzip("/update/", &plaintext)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let counter = storage.get_metric(Metric::query("PollCount", "counter"), "").await.unwrap();
    assert_eq!(counter.delta, Some(12));
}
