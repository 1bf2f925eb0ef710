use std::{io::ErrorKind, path::Path, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State, rejection::JsonRejection},
    http::{
        HeaderMap, HeaderName, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    catalog::{MediaCatalog, StreamDescriptor},
    config::{ARTIFACT_ID_HEADER, non_empty},
    error::{ApiError, MediaError},
    pipeline::FetchAndMerge,
    selector,
    store::{Artifact, ArtifactId, ArtifactStore},
    ytdlp::Extractor,
};

const DEFAULT_QUALITY: &str = "best";
const GENERATE_FAILED_MESSAGE: &str = "Failed to generate video";

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn Extractor>,
    pub pipeline: FetchAndMerge,
    pub store: ArtifactStore,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/video-info", get(video_info_query).post(video_info_body))
        .route("/download", get(download))
        .route("/video-file", get(video_file))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct VideoInfoParams {
    url: Option<String>,
    quality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    url: Option<String>,
    format_id: Option<String>,
    quality: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoFileParams {
    #[serde(alias = "file_path")]
    id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct VideoInfoResponse {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Present only when one stream carries both video and audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<StreamDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Media relay API running",
    }))
}

async fn video_info_query(
    State(state): State<AppState>,
    Query(params): Query<VideoInfoParams>,
) -> Result<Json<VideoInfoResponse>, ApiError> {
    describe(&state, params).await
}

async fn video_info_body(
    State(state): State<AppState>,
    payload: Result<Json<VideoInfoParams>, JsonRejection>,
) -> Result<Json<VideoInfoResponse>, ApiError> {
    let Json(params) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    describe(&state, params).await
}

async fn describe(
    state: &AppState,
    params: VideoInfoParams,
) -> Result<Json<VideoInfoResponse>, ApiError> {
    let url = required_url(params.url.as_deref())?;
    let quality = params
        .quality
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(DEFAULT_QUALITY);

    let raw = state.extractor.extract(url, quality).await.map_err(|error| {
        warn!("Extraction failed for {url:?}: {error}");
        error
    })?;
    let catalog = MediaCatalog::from_raw(raw);
    let selection = selector::select(&catalog)?;

    Ok(Json(VideoInfoResponse {
        url: selection.combined_url().map(ToString::to_string),
        title: catalog.title,
        thumbnail: catalog.thumbnail_url,
        duration: catalog.duration_seconds,
        uploader: catalog.uploader,
        video_url: selection.video_url,
        audio_url: selection.audio_url,
        formats: catalog.available,
        original_url: catalog.source_url,
    }))
}

async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, ApiError> {
    let url = required_url(params.url.as_deref())?;
    let format_id = params.format_id.as_deref().and_then(non_empty);
    let quality = params
        .quality
        .as_deref()
        .and_then(non_empty)
        .unwrap_or(DEFAULT_QUALITY);

    let artifact = state
        .pipeline
        .fetch_and_merge(url, format_id, quality)
        .await
        .map_err(|error| {
            warn!("Download pipeline failed for {url:?}: {error}");
            ApiError::with_message(error, GENERATE_FAILED_MESSAGE)
        })?;

    info!("Generated artifact {} for {url:?}", artifact.id);
    serve_artifact(&artifact).await
}

async fn video_file(
    State(state): State<AppState>,
    Query(params): Query<VideoFileParams>,
) -> Result<Response, ApiError> {
    let id = params
        .id
        .as_deref()
        .and_then(|value| value.parse::<ArtifactId>().ok())
        .ok_or(MediaError::FileNotFound)?;

    let artifact = state.store.get(id).await?.ok_or(MediaError::FileNotFound)?;
    serve_artifact(&artifact).await
}

fn required_url(url: Option<&str>) -> Result<&str, ApiError> {
    url.and_then(non_empty)
        .ok_or_else(|| ApiError::bad_request("A url parameter is required"))
}

async fn serve_artifact(artifact: &Artifact) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|error| match error.kind() {
            ErrorKind::NotFound => MediaError::FileNotFound,
            _ => MediaError::storage(format!("Could not open {:?}: {error}", artifact.path)),
        })?;
    let metadata = file.metadata().await.map_err(|error| {
        MediaError::storage(format!("Could not read metadata of {:?}: {error}", artifact.path))
    })?;

    let filename = artifact.file_name();
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&filename))
            .map_err(|_| ApiError::internal("Could not build the download header"))?,
    );
    headers.insert(
        HeaderName::from_static(ARTIFACT_ID_HEADER),
        HeaderValue::from_str(&artifact.id.to_string())
            .map_err(|_| ApiError::internal("Could not build the artifact header"))?,
    );

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

fn content_type_for_filename(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "ogg" | "opus" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_') {
                character
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "download.bin".to_string()
    } else {
        sanitized
    }
}
