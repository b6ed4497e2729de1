//! CloudConvert client tests against a local mock of the v2 jobs API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tempfile::TempDir;

use contractor::contracts::{BlobStore, ConversionError, DocumentConverter, SourceDocument};
use contractor::conversion::{
    CloudConvertClient, CloudConvertConfig, ConversionConfig, ConversionDispatcher,
};
use contractor::metrics::ConversionMetrics;
use contractor::storage::{LocalBlobStore, RetryConfig};

const API_KEY: &str = "test-key";
const PDF_BYTES: &[u8] = b"%PDF-1.7 converted";

#[derive(Clone, Copy, PartialEq)]
enum JobOutcome {
    Finished,
    Failed,
    NeverFinishes,
}

struct MockState {
    addr: SocketAddr,
    outcome: JobOutcome,
    polls: AtomicUsize,
    uploaded: Mutex<Option<Bytes>>,
    /// Job creations answered with a 500 before the service recovers.
    server_errors: AtomicUsize,
    create_attempts: AtomicUsize,
}

async fn create_job(State(state): State<Arc<MockState>>, headers: HeaderMap) -> impl IntoResponse {
    state.create_attempts.fetch_add(1, Ordering::SeqCst);
    let failing = state
        .server_errors
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "Internal Server Error" })),
        );
    }

    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", API_KEY))
        .unwrap_or(false);
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthenticated." })),
        );
    }

    (
        StatusCode::CREATED,
        Json(json!({
            "data": {
                "id": "job-1",
                "status": "waiting",
                "tasks": [
                    {
                        "name": "upload-source",
                        "operation": "import/upload",
                        "result": {
                            "form": {
                                "url": format!("http://{}/upload", state.addr),
                                "parameters": { "expires": 1700000000, "signature": "abc" }
                            }
                        }
                    },
                    { "name": "convert-source", "operation": "convert" },
                    { "name": "export-pdf", "operation": "export/url" }
                ]
            }
        })),
    )
}

async fn receive_upload(State(state): State<Arc<MockState>>, body: Bytes) -> StatusCode {
    if let Ok(mut slot) = state.uploaded.lock() {
        *slot = Some(body);
    }
    StatusCode::CREATED
}

async fn job_status(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let poll = state.polls.fetch_add(1, Ordering::SeqCst);
    let status = match state.outcome {
        // Report progress once before finishing
        _ if poll == 0 => "processing",
        JobOutcome::Finished => "finished",
        JobOutcome::Failed => "error",
        JobOutcome::NeverFinishes => "processing",
    };
    let message = (status == "error").then_some("Unsupported input file");

    Json(json!({
        "data": {
            "id": id,
            "status": status,
            "tasks": [
                {
                    "name": "convert-source",
                    "operation": "convert",
                    "message": message
                },
                {
                    "name": "export-pdf",
                    "operation": "export/url",
                    "result": {
                        "files": [
                            { "filename": "out.pdf", "url": format!("http://{}/files/out.pdf", state.addr) }
                        ]
                    }
                }
            ]
        }
    }))
}

async fn exported_file() -> &'static [u8] {
    PDF_BYTES
}

async fn start_mock(outcome: JobOutcome) -> Arc<MockState> {
    start_mock_with_errors(outcome, 0).await
}

async fn start_mock_with_errors(outcome: JobOutcome, server_errors: usize) -> Arc<MockState> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(MockState {
        addr,
        outcome,
        polls: AtomicUsize::new(0),
        uploaded: Mutex::new(None),
        server_errors: AtomicUsize::new(server_errors),
        create_attempts: AtomicUsize::new(0),
    });

    let router = Router::new()
        .route("/v2/jobs", post(create_job))
        .route("/v2/jobs/:id", get(job_status))
        .route("/upload", post(receive_upload))
        .route("/files/out.pdf", get(exported_file))
        .with_state(Arc::clone(&state));

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    state
}

fn client_for(mock: &MockState, api_key: &str) -> CloudConvertClient {
    let mut config = CloudConvertConfig::new(api_key);
    config.base_url = format!("http://{}", mock.addr);
    config.poll_interval = Duration::from_millis(10);
    config.max_wait = Duration::from_millis(500);
    config.retry = RetryConfig {
        max_retries: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    };
    CloudConvertClient::new(config).unwrap()
}

fn source() -> SourceDocument {
    SourceDocument {
        filename: "ivanov_20250923-001.html".into(),
        content_type: "text/html".into(),
        body: Bytes::from_static(b"<p>Contract 20250923-001</p>"),
    }
}

#[tokio::test]
async fn converts_through_full_job_lifecycle() {
    let mock = start_mock(JobOutcome::Finished).await;
    let client = client_for(&mock, API_KEY);

    let pdf = client.convert(source()).await.unwrap();
    assert_eq!(&pdf[..], PDF_BYTES);
    assert!(mock.polls.load(Ordering::SeqCst) >= 2);

    let uploaded = mock.uploaded.lock().unwrap().clone().unwrap();
    let uploaded = String::from_utf8_lossy(&uploaded);
    // Multipart body carries the signed form fields and the file
    assert!(uploaded.contains("signature"));
    assert!(uploaded.contains("ivanov_20250923-001.html"));
    assert!(uploaded.contains("<p>Contract 20250923-001</p>"));
}

#[tokio::test]
async fn failed_job_reports_task_message() {
    let mock = start_mock(JobOutcome::Failed).await;
    let client = client_for(&mock, API_KEY);

    match client.convert(source()).await {
        Err(ConversionError::Failed(message)) => {
            assert!(message.contains("Unsupported input file"), "{}", message)
        }
        other => panic!("expected failure, got {:?}", other.map(|b| b.len())),
    }
}

#[tokio::test]
async fn stuck_job_times_out() {
    let mock = start_mock(JobOutcome::NeverFinishes).await;
    let client = client_for(&mock, API_KEY);

    assert!(matches!(
        client.convert(source()).await,
        Err(ConversionError::Timeout(_))
    ));
}

#[tokio::test]
async fn server_error_is_retried() {
    let mock = start_mock_with_errors(JobOutcome::Finished, 1).await;
    let client = client_for(&mock, API_KEY);

    let pdf = client.convert(source()).await.unwrap();
    assert_eq!(&pdf[..], PDF_BYTES);
    assert_eq!(mock.create_attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_server_error_gives_up() {
    let mock = start_mock_with_errors(JobOutcome::Finished, 100).await;
    let client = client_for(&mock, API_KEY);

    match client.convert(source()).await {
        Err(ConversionError::Rejected { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected rejection, got {:?}", other.map(|b| b.len())),
    }
    // First attempt plus three retries
    assert_eq!(mock.create_attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn bad_api_key_is_rejected() {
    let mock = start_mock(JobOutcome::Finished).await;
    let client = client_for(&mock, "wrong-key");

    match client.convert(source()).await {
        Err(ConversionError::Rejected { status, .. }) => assert_eq!(status, 401),
        other => panic!("expected rejection, got {:?}", other.map(|b| b.len())),
    }
    assert_eq!(mock.polls.load(Ordering::SeqCst), 0);
    // Client errors are final
    assert_eq!(mock.create_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispatcher_stores_pdf_from_cloudconvert() {
    let mock = start_mock(JobOutcome::Finished).await;
    let dir = TempDir::new().unwrap();
    let blobs = Arc::new(LocalBlobStore::open(dir.path()).unwrap());
    let metrics = Arc::new(ConversionMetrics::default());
    let dispatcher = ConversionDispatcher::new(
        Arc::clone(&blobs),
        Arc::new(client_for(&mock, API_KEY)),
        ConversionConfig::default(),
        Arc::clone(&metrics),
    );

    dispatcher
        .spawn("ivanov_20250923-001".into(), source())
        .expect("conversion should be enabled")
        .await
        .unwrap();

    let pdf = blobs
        .get("contracts/ivanov_20250923-001.pdf")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&pdf[..], PDF_BYTES);
    assert_eq!(metrics.succeeded_total.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn dispatcher_keeps_going_after_failure() {
    let mock = start_mock(JobOutcome::Failed).await;
    let dir = TempDir::new().unwrap();
    let blobs = Arc::new(LocalBlobStore::open(dir.path()).unwrap());
    let metrics = Arc::new(ConversionMetrics::default());
    let dispatcher = ConversionDispatcher::new(
        Arc::clone(&blobs),
        Arc::new(client_for(&mock, API_KEY)),
        ConversionConfig::default(),
        Arc::clone(&metrics),
    );

    dispatcher
        .spawn("ivanov_20250923-001".into(), source())
        .unwrap()
        .await
        .unwrap();

    assert!(!blobs.exists("contracts/ivanov_20250923-001.pdf").await.unwrap());
    assert_eq!(metrics.failed_total.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.inflight.load(Ordering::Relaxed), 0);
}
