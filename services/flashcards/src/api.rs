use crate::commands::{CommandError, Dispatcher};
use crate::config::ApiConfig;
use crate::upload::store_upload;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

const CORS_ALLOW_METHODS: &str = "OPTIONS,POST,GET";
const CORS_ALLOW_HEADERS: &str = "Content-Type";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// A decoded command request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub command: String,
    pub content: Value,
}

/// Problems with the request itself, before any command runs
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Request body is empty")]
    Empty,

    #[error("Failed to decode base64 body: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Failed to parse JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing required 'command' field in request")]
    MissingCommand,
}

/// Decode a base64 body carrying `{"command": .., "content": {..}}`
pub fn decode_request(body: &[u8]) -> Result<RequestEnvelope, RequestError> {
    // Transports may wrap base64 across lines.
    let body: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    if body.is_empty() {
        return Err(RequestError::Empty);
    }

    let decoded = STANDARD.decode(&body)?;
    let mut request: Value = serde_json::from_slice(&decoded)?;

    let command = request
        .get("command")
        .and_then(Value::as_str)
        .ok_or(RequestError::MissingCommand)?
        .to_string();
    let content = request
        .get_mut("content")
        .map(Value::take)
        .unwrap_or(Value::Null);

    Ok(RequestEnvelope { command, content })
}

/// Run a command request and map the outcome onto a status and JSON body
#[instrument(skip_all)]
pub async fn handle_command_body(dispatcher: &Dispatcher, body: &[u8]) -> (StatusCode, Value) {
    let request = match decode_request(body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected request");
            return (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() }));
        }
    };

    match dispatcher.dispatch(&request.command, &request.content).await {
        Ok(result) => {
            let status = if result.is_success() {
                StatusCode::OK
            } else {
                StatusCode::BAD_REQUEST
            };
            let body = serde_json::to_value(&result)
                .unwrap_or_else(|e| json!({ "error": format!("Internal server error: {e}") }));
            (status, body)
        }
        Err(e) if e.is_validation() => (StatusCode::BAD_REQUEST, json!({ "error": e.to_string() })),
        Err(e) => {
            let cause = match e {
                CommandError::Internal(cause) => format!("{cause:#}"),
                other => other.to_string(),
            };
            error!(error = %cause, command = %request.command, "Internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": format!("Internal server error: {cause}") }),
            )
        }
    }
}

/// Store an uploaded multipart body; errors come back as a JSON string
#[instrument(skip_all)]
pub async fn handle_upload_body(
    dispatcher: &Dispatcher,
    content_type: &str,
    body: &[u8],
) -> (StatusCode, Value) {
    let encoded = String::from_utf8_lossy(body);
    let bucket = &dispatcher.settings().upload_bucket;

    match store_upload(dispatcher.objects().as_ref(), bucket, &encoded, content_type).await {
        Ok(location) => (
            StatusCode::OK,
            json!({
                "message": "File uploaded successfully",
                "location": location,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Upload rejected");
            (
                StatusCode::BAD_REQUEST,
                Value::String(format!("Error uploading file: {e}")),
            )
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        let base = CorsLayer::new()
            .allow_methods([Method::OPTIONS, Method::POST, Method::GET])
            .allow_headers([header::CONTENT_TYPE]);
        if config.cors_origins.is_empty() {
            base.allow_origin(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            base.allow_origin(origins)
        }
    } else {
        CorsLayer::new()
    };

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/", post(command).options(preflight))
        .route("/command", post(command).options(preflight))
        .route("/upload", post(upload).options(preflight))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http());

    // Every response carries the allowed methods and headers, not only preflights.
    if config.cors_enabled {
        router = router
            .layer(SetResponseHeaderLayer::if_not_present(
                header::ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(CORS_ALLOW_METHODS),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(CORS_ALLOW_HEADERS),
            ));
    }

    router.layer(cors).with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "flashcards-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.dispatcher.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": format!("{e:#}")
            })),
        ),
    }
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn command(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let (status, body) = handle_command_body(&state.dispatcher, &body).await;
    (status, Json(body))
}

async fn upload(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let (status, body) = handle_upload_body(&state.dispatcher, content_type, &body).await;
    (status, Json(body))
}

/// Start the API server and serve until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting flashcards API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockFlashcardStore;
    use crate::testing::TestHarness;

    fn encode(value: Value) -> Vec<u8> {
        STANDARD.encode(value.to_string()).into_bytes()
    }

    #[test]
    fn test_decode_request() {
        let request = decode_request(&encode(json!({
            "command": "get_flashcards",
            "content": {"set_name": "rust"}
        })))
        .unwrap();
        assert_eq!(request.command, "get_flashcards");
        assert_eq!(request.content, json!({"set_name": "rust"}));

        let without_content = decode_request(&encode(json!({"command": "get_sets"}))).unwrap();
        assert_eq!(without_content.content, Value::Null);
    }

    #[test]
    fn test_decode_request_errors() {
        assert_eq!(decode_request(b"  ").unwrap_err().to_string(), "Request body is empty");
        assert!(decode_request(b"not base64!")
            .unwrap_err()
            .to_string()
            .starts_with("Failed to decode base64 body"));
        assert!(decode_request(STANDARD.encode("{oops").as_bytes())
            .unwrap_err()
            .to_string()
            .starts_with("Failed to parse JSON body"));
        assert_eq!(
            decode_request(&encode(json!({"content": {}}))).unwrap_err().to_string(),
            "Missing required 'command' field in request"
        );
        assert!(matches!(
            decode_request(&encode(json!({"command": 7}))),
            Err(RequestError::MissingCommand)
        ));
    }

    #[tokio::test]
    async fn test_command_status_mapping() {
        let harness = TestHarness::new();
        let d = &harness.dispatcher;

        let (status, body) = handle_command_body(
            d,
            &encode(json!({"command": "create_set", "content": {"name": "rust", "description": "d"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"msg": "Successfully created set rust with description d"}));

        let (status, body) = handle_command_body(
            d,
            &encode(json!({"command": "create_set", "content": {"name": "rust"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Error creating set: set rust already exists"}));

        let (status, body) = handle_command_body(d, &encode(json!({"command": "frobnicate"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid command: frobnicate"}));

        let (status, _) = handle_command_body(
            d,
            &encode(json!({"command": "add_flashcard", "content": {"set_name": "rust"}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = handle_command_body(d, b"").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Request body is empty"}));
    }

    #[tokio::test]
    async fn test_command_null_content_is_empty_object() {
        let harness = TestHarness::new();
        let (status, body) = handle_command_body(
            &harness.dispatcher,
            &encode(json!({"command": "get_sets", "content": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"msg": []}));
    }

    #[tokio::test]
    async fn test_store_failure_maps_to_bad_request() {
        let mut store = MockFlashcardStore::new();
        store
            .expect_scan_sets()
            .returning(|| Err(anyhow::anyhow!("connection refused")));

        let harness = TestHarness::with_store(store);
        let (status, body) =
            handle_command_body(&harness.dispatcher, &encode(json!({"command": "get_sets"}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Error getting sets: connection refused"}));
    }

    #[tokio::test]
    async fn test_upload_success_and_failure() {
        let harness = TestHarness::new();
        let multipart = b"--b\r\nContent-Type: image/png; filename=\"x\"\r\n\r\nP\r\n--b--\r\n";
        let body = STANDARD.encode(multipart);

        let (status, response) = handle_upload_body(
            &harness.dispatcher,
            "multipart/form-data; boundary=b",
            body.as_bytes(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["message"], "File uploaded successfully");
        assert_eq!(response["location"]["bucket"], "flashcards-files");
        let key = response["location"]["key"].as_str().unwrap();
        assert!(key.ends_with(".png"));
        assert_eq!(harness.objects.get("flashcards-files", key), Some(b"P".to_vec()));

        let (status, response) = handle_upload_body(&harness.dispatcher, "text/plain", body.as_bytes()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response,
            Value::String("Error uploading file: Missing multipart boundary in content type".into())
        );
    }

    /// Serve the harness's dispatcher on an ephemeral port
    async fn serve(harness: &TestHarness) -> String {
        let router = create_router(
            AppState {
                dispatcher: harness.dispatcher.clone(),
            },
            &ApiConfig::default(),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        format!("http://{addr}")
    }

    fn assert_cors_headers(response: &reqwest::Response) {
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "*");
        assert_eq!(headers["access-control-allow-methods"], "OPTIONS,POST,GET");
        assert!(headers["access-control-allow-headers"]
            .to_str()
            .unwrap()
            .eq_ignore_ascii_case("content-type"));
    }

    #[tokio::test]
    async fn test_preflight_answers_with_cors_headers() {
        let harness = TestHarness::new();
        let base = serve(&harness).await;
        let client = reqwest::Client::new();

        for path in ["/command", "/upload", "/"] {
            let response = client
                .request(reqwest::Method::OPTIONS, format!("{base}{path}"))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::OK, "{path}");
            assert_cors_headers(&response);

            let response = client
                .request(reqwest::Method::OPTIONS, format!("{base}{path}"))
                .header("Origin", "https://cards.example")
                .header("Access-Control-Request-Method", "POST")
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), reqwest::StatusCode::OK, "{path}");
            assert_cors_headers(&response);
        }
    }

    #[tokio::test]
    async fn test_command_responses_carry_cors_headers() {
        let harness = TestHarness::new();
        let base = serve(&harness).await;
        let client = reqwest::Client::new();

        let ok = client
            .post(format!("{base}/command"))
            .header("Origin", "https://cards.example")
            .body(encode(json!({"command": "get_sets"})))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), reqwest::StatusCode::OK);
        assert_cors_headers(&ok);
        assert_eq!(ok.json::<Value>().await.unwrap(), json!({"msg": []}));

        let rejected = client
            .post(format!("{base}/command"))
            .header("Origin", "https://cards.example")
            .body(encode(json!({"command": "frobnicate"})))
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_cors_headers(&rejected);
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let harness = TestHarness::new();
        let base = serve(&harness).await;

        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);
        assert_eq!(health.json::<Value>().await.unwrap()["status"], "healthy");

        let ready = reqwest::get(format!("{base}/ready")).await.unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::OK);
    }
}
