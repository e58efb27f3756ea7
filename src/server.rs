//! HTTP front end.
//!
//! `POST /upload/` takes a multipart body with repeated `file` and
//! `categories` fields and answers with the zipped category tree. The archive
//! is streamed from disk; the batch directory is removed once the body stream
//! is dropped, which happens after the last chunk is sent or when the client
//! disconnects.

use crate::batch::{sort_batch, Pipeline};
use crate::error::SortError;
use crate::pipeline::cleanup::sweep_stale_batches;
use crate::pipeline::input::{UploadBatch, UploadedFile};
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

pub const HEADER_BATCH_ID: HeaderName = HeaderName::from_static("x-notesort-batch-id");
pub const HEADER_ORGANIZED: HeaderName = HeaderName::from_static("x-notesort-organized");
pub const HEADER_FAILED: HeaderName = HeaderName::from_static("x-notesort-failed");

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Default: 127.0.0.1:8000.
    pub bind: SocketAddr,
    /// Origins allowed by CORS; `*` allows any origin without credentials.
    /// Default: `http://localhost:3000`.
    pub allowed_origins: Vec<String>,
    /// Request body limit in bytes. Default: 50 MiB.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            allowed_origins: vec!["http://localhost:3000".to_string()],
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

/// [`SortError`] as an HTTP response: `{"detail": "..."}`.
pub struct ApiError(SortError);

impl From<SortError> for ApiError {
    fn from(e: SortError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            SortError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("{}", self.0);
        } else {
            warn!("{}", self.0);
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

/// Collect `file` and `categories` fields. Other fields are ignored.
pub async fn read_upload(mut multipart: Multipart) -> Result<UploadBatch, SortError> {
    let invalid = |e: axum::extract::multipart::MultipartError| SortError::InvalidUpload(e.body_text());
    let mut batch = UploadBatch::default();

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(invalid)?;
                debug!("Received {:?} ({} bytes)", file_name, data.len());
                batch.files.push(UploadedFile::new(file_name, data));
            }
            Some("categories") => {
                batch.categories.push(field.text().await.map_err(invalid)?);
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }
    Ok(batch)
}

async fn upload(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let batch = read_upload(multipart).await?;
    let sorted = sort_batch(&state.pipeline, batch).await?;
    let (manifest, archive, guard) = sorted.into_parts();

    let file = tokio::fs::File::open(&archive)
        .await
        .map_err(|e| SortError::workspace(&archive, e))?;
    // The guard lives as long as the body stream.
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _guard = &guard;
        chunk
    });

    let archive_name = &state.pipeline.config().archive_name;
    let header_err = |e: axum::http::Error| SortError::Internal(format!("response headers: {e}"));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{archive_name}\""),
        )
        .header(HEADER_BATCH_ID, manifest.batch_id.as_str())
        .header(HEADER_ORGANIZED, manifest.stats.organized_files.to_string())
        .header(HEADER_FAILED, manifest.stats.failed_files.to_string())
        .body(Body::from_stream(stream))
        .map_err(header_err)?;
    Ok(response)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// CORS for the configured origins.
///
/// Explicit origins get credentials and mirror the requested method and
/// headers; `*` allows everything without credentials.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer, SortError> {
    let exposed = [header::CONTENT_DISPOSITION, HEADER_BATCH_ID, HEADER_ORGANIZED, HEADER_FAILED];

    if origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(exposed));
    }

    let values = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|_| SortError::InvalidConfig(format!("invalid CORS origin {o:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(values))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers(exposed))
}

/// Build the application router.
pub fn router(state: AppState, config: &ServerConfig) -> Result<Router, SortError> {
    Ok(Router::new()
        .route("/upload/", post(upload))
        .route("/upload", post(upload))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.allowed_origins)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Sweep leftovers, bind and serve until Ctrl-C.
pub async fn serve(config: ServerConfig, pipeline: Pipeline) -> Result<(), SortError> {
    let work_dir = pipeline.config().work_dir.clone();
    sweep_stale_batches(&work_dir)
        .await
        .map_err(|e| SortError::workspace(&work_dir, e))?;

    let app = router(AppState::new(pipeline), &config)?;
    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|e| SortError::Internal(format!("failed to bind {}: {e}", config.bind)))?;
    info!("Listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| SortError::Internal(format!("server error: {e}")))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
