//! HTTP surface: `/`, `/health` and the `/api/v1` routes.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State, rejection::JsonRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::{
    config::API_V1_PREFIX,
    error::ServiceError,
    files::{attachment_disposition, content_type_for, resolve_served_path},
    metadata::{DownloadResult, VideoMetadata},
    service::VideoService,
};

#[derive(Clone)]
pub struct AppState {
    service: VideoService,
}

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub audio_only: bool,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self {
            status: err.status(),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "detail": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(service: VideoService) -> Router {
    let cors = build_cors_layer(&service.settings().allowed_origins);

    let api = Router::new()
        .route("/info", post(video_info))
        .route("/download", post(download_video))
        .route("/file/{*path}", get(serve_file));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest(API_V1_PREFIX, api)
        .with_state(AppState { service })
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid origin in ALLOWED_ORIGINS: {origin}");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "Welcome to YouTube Endpoint API" }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn video_info(
    State(state): State<AppState>,
    payload: Result<Json<InfoRequest>, JsonRejection>,
) -> ApiResult<Json<VideoMetadata>> {
    let Json(request) = payload?;
    let metadata = state.service.fetch_info(&request.url).await?;
    Ok(Json(metadata))
}

async fn download_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> ApiResult<Json<DownloadResult>> {
    let Json(request) = payload?;
    let mut result = state
        .service
        .download(
            &request.url,
            request.format_id.as_deref(),
            request.audio_only,
        )
        .await?;

    let base = public_base_url(&state, &headers);
    result.download_url = Some(format!(
        "{base}{API_V1_PREFIX}/file/{}",
        result.relative_path
    ));
    Ok(Json(result))
}

/// Configured public URL, else whatever host the client used.
fn public_base_url(state: &AppState, headers: &HeaderMap) -> String {
    if let Some(base) = &state.service.settings().public_base_url {
        return base.clone();
    }
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_default()
}

async fn serve_file(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
) -> ApiResult<Response> {
    let root = &state.service.settings().download_root;
    let full_path = resolve_served_path(root, &path)?;

    // Any filesystem failure is reported as not found.
    let file = File::open(&full_path)
        .await
        .map_err(|_| ServiceError::FileNotFound)?;
    let meta = file
        .metadata()
        .await
        .map_err(|_| ServiceError::FileNotFound)?;
    if !meta.is_file() {
        return Err(ServiceError::FileNotFound.into());
    }

    let stream = ReaderStream::new(file);
    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = content_type_for(&full_path).to_string().parse() {
        headers.insert(header::CONTENT_TYPE, value);
    }
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
    if let Ok(value) = attachment_disposition(&full_path).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}
