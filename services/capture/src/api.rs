use crate::config::{ApiConfig, StorageConfig};
use crate::error::CaptureError;
use crate::frame_sequencer::{decode_data_url, FrameSequencer};
use crate::paths::{Category, Clock, DateBucket, PathResolver, SessionId};
use crate::result_store::{ResultRecord, ResultStore};
use crate::session_allocator::{SessionAllocator, SessionNumbering};
use crate::video_archiver::VideoArchiver;
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::io::StreamReader;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument};

/// Mount point of the storage root for the result page
pub const RESULTS_MOUNT: &str = "/static/result_images";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionAllocator>,
    pub sequencer: Arc<FrameSequencer>,
    pub videos: Arc<VideoArchiver>,
    pub results: Arc<ResultStore>,
    pub clock: Arc<dyn Clock>,
    pub auto_start_session: bool,
}

impl AppState {
    /// Wire the core components over one storage root
    pub fn new(storage: &StorageConfig, clock: Arc<dyn Clock>) -> Self {
        let numbering = Arc::new(SessionNumbering::new(PathResolver::new(
            storage.result_root.clone(),
        )));
        let sessions = Arc::new(SessionAllocator::new(numbering.clone()));

        Self {
            sequencer: Arc::new(FrameSequencer::new(sessions.clone())),
            videos: Arc::new(VideoArchiver::new(numbering)),
            results: Arc::new(ResultStore::new(sessions.clone())),
            sessions,
            clock,
            auto_start_session: storage.auto_start_session,
        }
    }
}

/// Capture request from the play page
#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    /// `data:image/jpeg;base64,...`
    pub image: String,
    /// Frame has the skeleton overlay drawn in
    #[serde(default)]
    pub skeleton: bool,
    /// Game round the frame belongs to
    pub round: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PlayResponse {
    pub status: &'static str,
    pub session: SessionId,
    pub date: DateBucket,
}

#[derive(Debug, Serialize)]
pub struct CaptureResponse {
    pub status: &'static str,
    pub session: SessionId,
    /// Saved filename
    pub saved: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub session: SessionId,
    /// Storage path of the video
    pub path: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub message: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig, storage: &StorageConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/play", get(play))
        .route("/capture", post(capture))
        .route("/upload_video", post(upload_video))
        .route("/result_redirect", post(result_redirect))
        .route("/result", get(result))
        .route("/end", post(end_game));

    if config.serve_results {
        router = router.nest_service(RESULTS_MOUNT, ServeDir::new(&storage.result_root));
    }

    router
        .layer(DefaultBodyLimit::max(storage.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run blocking filesystem work off the async workers
async fn run_blocking<T, F>(f: F) -> Result<T, CaptureError>
where
    F: FnOnce() -> Result<T, CaptureError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CaptureError::TaskFailed(e.to_string()))?
}

fn results_url(web_path: &str) -> String {
    format!("{}/{}", RESULTS_MOUNT, web_path)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "capture-service"
    }))
}

/// Start (or rejoin) the capture run
#[instrument(skip(state))]
async fn play(State(state): State<AppState>) -> Result<Json<PlayResponse>, CaptureError> {
    let today = state.clock.today();
    let sessions = state.sessions.clone();

    let active =
        run_blocking(move || sessions.ensure_active(Category::Capture, today)).await?;

    Ok(Json(PlayResponse {
        status: "ok",
        session: active.session,
        date: active.date,
    }))
}

/// Save one frame into the active run
#[instrument(skip(state, payload))]
async fn capture(
    State(state): State<AppState>,
    payload: Result<Json<CaptureRequest>, JsonRejection>,
) -> Result<Json<CaptureResponse>, CaptureError> {
    let Json(request) = payload.map_err(|e| CaptureError::ClientInput(e.body_text()))?;
    debug!(skeleton = request.skeleton, round = ?request.round, "Capture requested");

    let today = state.clock.today();
    let sessions = state.sessions.clone();
    let sequencer = state.sequencer.clone();
    let auto_start = state.auto_start_session;

    let frame = run_blocking(move || {
        let image = decode_data_url(&request.image)?;
        if auto_start {
            sessions.ensure_session(Category::Capture, today)?;
        }
        sequencer.capture_frame(&image)
    })
    .await?;

    Ok(Json(CaptureResponse {
        status: "ok",
        session: frame.session,
        url: results_url(&frame.web_path),
        saved: frame.filename,
    }))
}

/// Store an uploaded run video in its own session
#[instrument(skip(state, multipart))]
async fn upload_video(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, CaptureError> {
    let mut multipart = multipart.map_err(|e| CaptureError::ClientInput(e.body_text()))?;
    let today = state.clock.today();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CaptureError::ClientInput(e.body_text()))?
    {
        if field.name() != Some("file") && field.file_name().is_none() {
            continue;
        }
        debug!(file_name = ?field.file_name(), "Receiving video upload");

        let body = StreamReader::new(
            field.map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string())),
        );
        tokio::pin!(body);

        let video = state.videos.archive_video(today, body).await?;
        return Ok(Json(UploadResponse {
            status: "ok",
            session: video.session,
            path: video.path.display().to_string(),
            url: results_url(&video.web_path),
        }));
    }

    Err(CaptureError::ClientInput(
        "multipart body has no file field".to_string(),
    ))
}

/// Record the finished run and send the browser to the result page
#[instrument(skip(state, payload))]
async fn result_redirect(
    State(state): State<AppState>,
    payload: Result<Json<ResultRecord>, JsonRejection>,
) -> Result<Redirect, CaptureError> {
    let Json(record) = payload.map_err(|e| CaptureError::ClientInput(e.body_text()))?;
    let results = state.results.clone();

    run_blocking(move || {
        results.post_result(record);
        Ok(())
    })
    .await?;

    Ok(Redirect::to("/result"))
}

/// Latest result for the result page
async fn result(State(state): State<AppState>) -> Json<ResultRecord> {
    Json(state.results.get_latest())
}

/// Explicitly clear the capture run
#[instrument(skip(state))]
async fn end_game(State(state): State<AppState>) -> Result<Json<StatusResponse>, CaptureError> {
    let sessions = state.sessions.clone();
    run_blocking(move || {
        sessions.end_session();
        Ok(())
    })
    .await?;

    Ok(Json(StatusResponse {
        status: "ok",
        message: "session cleared".to_string(),
    }))
}

/// Bind the API listener
pub async fn bind_listener(config: &ApiConfig) -> Result<TcpListener> {
    let addr = format!("{}:{}", config.host, config.port);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!(address = %addr, "Capture API listening");
    Ok(listener)
}

/// Serve the capture API on an already bound listener
pub async fn serve_api(
    listener: TcpListener,
    state: AppState,
    config: &ApiConfig,
    storage: &StorageConfig,
) -> Result<()> {
    let router = create_router(state, config, storage);

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
