//! `HttpVisionBackend` against a local axum server.

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use edgequake_ieeu::{
    classify, CallFailure, DescribeConfig, Describer, ErrorKind, HttpVisionBackend, ImagePayload,
    VisionBackend, VisionRequest,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

const PNG_MAGIC: [u8; 12] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n', 0, 0, 0, 0];

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/chat/completions")
}

/// Every request answers `status` with `body`, counting hits.
async fn fixed(status: StatusCode, body: &'static str) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                (status, body)
            }
        }),
    );
    (spawn(app).await, hits)
}

fn request() -> VisionRequest {
    VisionRequest {
        source: "images/fig1.png".into(),
        model: "test-model".into(),
        prompt: "Describe the figure.".into(),
        max_tokens: 4096,
        image: ImagePayload::from_bytes(&PNG_MAGIC),
    }
}

fn backend(endpoint: &str, timeout_secs: u64) -> HttpVisionBackend {
    HttpVisionBackend::new(endpoint, "test-key", timeout_secs).unwrap()
}

async fn chat(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer test-key");
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }

    let content = &body["messages"][0]["content"];
    let well_formed = body["model"] == "test-model"
        && body["max_tokens"] == 4096
        && body["messages"][0]["role"] == "user"
        && content[0]["type"] == "text"
        && content[1]["type"] == "image_url"
        && content[1]["image_url"]["url"]
            .as_str()
            .is_some_and(|url| url.starts_with("data:image/png;base64,"));
    if !well_formed {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "bad body"})));
    }

    (
        StatusCode::OK,
        Json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Sure.\n```figure\nA line plot of loss over epochs.\n```"
                }
            }]
        })),
    )
}

#[tokio::test]
async fn success_returns_message_content() {
    let endpoint = spawn(Router::new().route("/v1/chat/completions", post(chat))).await;

    let text = backend(&endpoint, 5).complete(&request()).await.unwrap();

    assert!(text.contains("```figure\nA line plot of loss over epochs.\n```"));
}

#[tokio::test]
async fn describer_parses_the_figure_block() {
    let endpoint = spawn(Router::new().route("/v1/chat/completions", post(chat))).await;
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("fig1.png");
    std::fs::write(&image, PNG_MAGIC).unwrap();

    let config = DescribeConfig::builder()
        .endpoint(&endpoint)
        .api_key("test-key")
        .model("test-model")
        .build()
        .unwrap();
    let describer = Describer::from_config(&config).unwrap();

    assert_eq!(
        describer.describe(&image).await.as_deref(),
        Ok("A line plot of loss over epochs.")
    );
}

#[tokio::test]
async fn unauthorized_is_auth_error_and_not_retried() {
    let (endpoint, hits) = fixed(StatusCode::UNAUTHORIZED, "invalid api key").await;
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("fig1.png");
    std::fs::write(&image, PNG_MAGIC).unwrap();

    let config = DescribeConfig::builder()
        .endpoint(&endpoint)
        .api_key("wrong")
        .model("test-model")
        .retries(3)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let describer = Describer::from_config(&config).unwrap();

    assert_eq!(describer.describe(&image).await, Err(ErrorKind::AuthError));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn status_codes_map_to_kinds() {
    let cases = [
        (StatusCode::FORBIDDEN, "forbidden", ErrorKind::AuthError),
        (StatusCode::TOO_MANY_REQUESTS, "slow down", ErrorKind::RateLimited),
        (StatusCode::INTERNAL_SERVER_ERROR, "boom", ErrorKind::ServerError),
        (StatusCode::BAD_GATEWAY, "rate limit upstream", ErrorKind::ServerError),
        (StatusCode::BAD_REQUEST, "too many concurrent requests", ErrorKind::ConcurrencyPressure),
        (StatusCode::BAD_REQUEST, "unsupported image", ErrorKind::Unknown),
    ];

    for (status, body, expected) in cases {
        let (endpoint, _) = fixed(status, body).await;
        let failure = backend(&endpoint, 5).complete(&request()).await.unwrap_err();

        assert_eq!(failure.status(), Some(status.as_u16()));
        assert_eq!(classify(&failure), expected, "{status} {body}");
    }
}

#[tokio::test]
async fn non_json_success_is_malformed() {
    let (endpoint, _) = fixed(StatusCode::OK, "<html>gateway</html>").await;

    let failure = backend(&endpoint, 5).complete(&request()).await.unwrap_err();

    assert!(matches!(failure, CallFailure::Malformed(_)));
    assert_eq!(classify(&failure), ErrorKind::Unknown);
}

#[tokio::test]
async fn connection_refused_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let failure = backend(&format!("http://{addr}/v1/chat/completions"), 5)
        .complete(&request())
        .await
        .unwrap_err();

    assert_eq!(classify(&failure), ErrorKind::NetworkError);
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "too late"
        }),
    );
    let endpoint = spawn(app).await;

    let failure = backend(&endpoint, 1).complete(&request()).await.unwrap_err();

    assert!(matches!(failure, CallFailure::Timeout(_)));
    assert_eq!(classify(&failure), ErrorKind::Timeout);
}

#[tokio::test]
async fn connection_dropped_after_request_is_network_error() {
    // Accepts, reads the start of the request, then closes with the rest
    // still unread, which makes the kernel answer with a reset.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut head = [0u8; 16];
            let _ = socket.read(&mut head).await;
            drop(socket);
        }
    });

    let failure = backend(&format!("http://{addr}/v1/chat/completions"), 5)
        .complete(&request())
        .await
        .unwrap_err();

    assert!(matches!(failure, CallFailure::Connect(_)), "{failure:?}");
    assert_eq!(classify(&failure), ErrorKind::NetworkError);
}
