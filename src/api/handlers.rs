//! REST and event-stream handlers. Routing lives in [`super::router`];
//! everything here is a thin translation layer between HTTP and the stores,
//! registry, and filesystem helpers.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::{Multipart, Path as AxumPath, Query, State};
use bytes::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;

use super::error::ApiError;
use super::AppState;
use crate::files;
use crate::keys::KeysRequest;
use crate::session::SessionInfo;
use crate::store::marked::MarkedFile;
use crate::store::ui_state::UiState;

// ── info ────────────────────────────────────────────────────────────

pub async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "workDir": state.manager.work_dir(),
        "uploadDir": state.upload_dir,
        "shell": state.manager.shell(),
        "port": state.manager.server_port(),
        "sessionCount": state.manager.session_count(),
        "tmuxSocket": state.manager.tmux_socket(),
    }))
}

// ── sessions ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: String,
}

pub async fn session_list(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.manager.list())
}

pub async fn session_create(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let session = state.manager.create(&req.name).await?;
    Ok((StatusCode::CREATED, Json(session.info())))
}

pub async fn session_delete(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.manager.close(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

pub async fn session_rename(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<SessionInfo>, ApiError> {
    Ok(Json(state.manager.rename(&id, &req.name)?))
}

/// `POST /api/sessions/{id}/keys`. The body is parsed by hand so unknown
/// fields and malformed JSON map to the structured 400, while the 32 KiB
/// route body limit yields 413 before this handler runs.
pub async fn session_keys(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let req: KeysRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    state.manager.send_keys(&id, &req).await?;
    Ok(Json(serde_json::json!({"status": "ok"})))
}

// ── upload ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<String>,
    pub count: usize,
}

/// Multipart upload. Parts stream through a temp file and are moved into
/// place afterwards, because the `directory` field may arrive after the
/// first file part. Filenames are reduced to their basename, and existing
/// files are never overwritten (` (n)` suffix).
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut target_dir: Option<PathBuf> = None;
    let mut staged: Vec<(String, tempfile::TempPath)> = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("failed to parse form: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("directory") => {
                let dir = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
                if !dir.is_empty() {
                    target_dir = Some(files::clean_path(&dir));
                }
            }
            Some("files") => {
                let filename = field
                    .file_name()
                    .map(|n| {
                        Path::new(n)
                            .file_name()
                            .map(|b| b.to_string_lossy().to_string())
                            .unwrap_or_default()
                    })
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "upload".to_string());

                let temp = tempfile::NamedTempFile::new()
                    .map_err(|e| ApiError::Internal(format!("failed to stage upload: {}", e)))?
                    .into_temp_path();
                let mut dest = tokio::fs::File::create(&temp)
                    .await
                    .map_err(|e| ApiError::Internal(format!("failed to stage upload: {}", e)))?;
                while let Some(chunk) = field
                    .chunk()
                    .await
                    .map_err(|e| ApiError::InvalidRequest(format!("upload read failed: {}", e)))?
                {
                    dest.write_all(&chunk)
                        .await
                        .map_err(|e| ApiError::Internal(format!("upload write failed: {}", e)))?;
                }
                dest.flush()
                    .await
                    .map_err(|e| ApiError::Internal(format!("upload write failed: {}", e)))?;
                staged.push((filename, temp));
            }
            _ => {}
        }
    }

    let target_dir = target_dir.unwrap_or_else(|| state.upload_dir.clone());
    tokio::fs::create_dir_all(&target_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to create directory: {}", e)))?;

    let mut uploaded = Vec::with_capacity(staged.len());
    for (filename, temp) in staged {
        let dest = files::unique_dest_path(&target_dir, &filename);
        move_file(&temp, &dest)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to store upload: {}", e)))?;
        tracing::info!("uploaded file: {}", dest.display());
        uploaded.push(dest.to_string_lossy().to_string());
    }

    Ok(Json(UploadResponse {
        count: uploaded.len(),
        uploaded,
    }))
}

/// Rename if possible, copy-and-delete when the temp dir is on another
/// filesystem.
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(_) => {
            tokio::fs::copy(from, to).await?;
            tokio::fs::remove_file(from).await.ok();
            Ok(())
        }
    }
}

// ── download / browse ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: String,
}

fn attachment_headers(filename: &str, content_type: &str, len: Option<u64>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let escaped = filename.replace('\\', "\\\\").replace('"', "\\\"");
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", escaped))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type).unwrap(),
    );
    if let Some(len) = len {
        headers.insert(
            header::CONTENT_LENGTH,
            HeaderValue::from_str(&len.to_string()).unwrap(),
        );
    }
    headers
}

async fn stream_file(path: &Path, download_name: &str) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::NotFound("file".to_string()),
        _ => ApiError::Internal(format!("failed to open {}: {}", path.display(), e)),
    })?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .len();
    let headers = attachment_headers(download_name, "application/octet-stream", Some(len));
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

fn stream_spool(spool: std::fs::File, download_name: &str) -> Response {
    let len = spool.metadata().ok().map(|m| m.len());
    let headers = attachment_headers(download_name, "application/zip", len);
    let body = Body::from_stream(ReaderStream::new(tokio::fs::File::from_std(spool)));
    (headers, body).into_response()
}

/// `GET /api/download?path=...` — a regular file streams directly; a
/// directory streams as a freshly built zip.
pub async fn download(
    State(_state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    if query.path.is_empty() {
        return Err(ApiError::InvalidRequest("path parameter required".into()));
    }
    let path = files::clean_path(&query.path);

    let meta = tokio::fs::metadata(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ApiError::NotFound("file".to_string()),
        _ => ApiError::Internal(format!("failed to stat {}: {}", path.display(), e)),
    })?;

    if meta.is_dir() {
        let name = format!(
            "{}.zip",
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "download".to_string())
        );
        let dir = path.clone();
        let spool = tokio::task::spawn_blocking(move || files::zip_directory(&dir))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(|e| ApiError::Internal(format!("zip failed: {}", e)))?;
        return Ok(stream_spool(spool, &name));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    stream_file(&path, &name).await
}

#[derive(Debug, Serialize)]
pub struct BrowseResponse {
    pub path: String,
    pub files: Vec<files::BrowseEntry>,
}

/// `GET /api/browse?path=...` — defaults to the home directory.
pub async fn browse(
    State(_state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Json<BrowseResponse>, ApiError> {
    let path = if query.path.is_empty() {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
    } else {
        files::clean_path(&query.path)
    };

    let listing = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || files::browse_dir(&path))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .map_err(|e| ApiError::Internal(format!("failed to read directory: {}", e)))?
    };

    Ok(Json(BrowseResponse {
        path: path.to_string_lossy().to_string(),
        files: listing,
    }))
}

// ── settings ────────────────────────────────────────────────────────

pub async fn settings_get(State(state): State<AppState>) -> Json<crate::settings::Settings> {
    Json(state.settings.get())
}

pub async fn settings_post(
    State(state): State<AppState>,
    Json(settings): Json<crate::settings::Settings>,
) -> Result<Json<crate::settings::Settings>, ApiError> {
    Ok(Json(state.settings.update(settings)?))
}

// ── ui state ────────────────────────────────────────────────────────

pub async fn ui_state_get(State(state): State<AppState>) -> Json<UiState> {
    Json(state.ui_state.get(&state.manager.live_ids()))
}

pub async fn ui_state_post(
    State(state): State<AppState>,
    Json(ui): Json<UiState>,
) -> Json<UiState> {
    Json(state.ui_state.set(&ui, &state.manager.live_ids()))
}

// ── scratch pad ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ScratchRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub toggle: String,
}

pub async fn scratch_get(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"text": state.scratch.get()}))
}

pub async fn scratch_post(
    State(state): State<AppState>,
    Json(req): Json<ScratchRequest>,
) -> Json<serde_json::Value> {
    // Toggle mode signals show/hide without changing the text.
    if req.toggle == "true" {
        let text = state.scratch.toggle();
        return Json(serde_json::json!({"status": "toggled", "text": text}));
    }
    state.scratch.set(req.text);
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn scratch_delete(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scratch.clear();
    Json(serde_json::json!({"status": "cleared"}))
}

/// Shared SSE shape: one `init` event immediately, then live events.
/// Framing is `data: <json>\n\n`; slow subscribers drop events and resync
/// via the corresponding GET.
fn sse_response<T>(init: T, rx: tokio::sync::mpsc::Receiver<T>) -> Response
where
    T: Serialize + Send + 'static,
{
    let stream = futures::stream::once(async move { init })
        .chain(ReceiverStream::new(rx))
        .map(|event| Event::default().json_data(&event));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream),
    )
        .into_response()
}

pub async fn scratch_events(State(state): State<AppState>) -> Response {
    let (init, rx) = state.scratch.subscribe();
    sse_response(init, rx)
}

// ── marked files ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MarkedResponse {
    pub files: Vec<MarkedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<bool>,
}

pub async fn marked_get(State(state): State<AppState>) -> Json<MarkedResponse> {
    Json(MarkedResponse {
        files: state.marked.list(),
        added: None,
    })
}

#[derive(Debug, Deserialize)]
pub struct MarkRequest {
    pub path: String,
}

pub async fn marked_post(
    State(state): State<AppState>,
    Json(req): Json<MarkRequest>,
) -> Result<Json<MarkedResponse>, ApiError> {
    let path = files::clean_path(&req.path);
    let (files, added) = state.marked.add(&path)?;
    Ok(Json(MarkedResponse {
        files,
        added: Some(added),
    }))
}

pub async fn marked_delete(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Json<MarkedResponse> {
    let files = if query.path.is_empty() {
        state.marked.clear()
    } else {
        let path = files::clean_path(&query.path);
        state.marked.remove(&path.to_string_lossy())
    };
    Json(MarkedResponse { files, added: None })
}

pub async fn marked_events(State(state): State<AppState>) -> Response {
    let (init, rx) = state.marked.subscribe();
    sse_response(init, rx)
}

/// `GET /api/marked/download[?path=...]` — one regular file streams
/// directly; anything else becomes a zip with collision-free top-level
/// names. Entries that made it into the download leave the marked set.
pub async fn marked_download(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    let all = state.marked.list();
    let selected: Vec<MarkedFile> = if query.path.is_empty() {
        all
    } else {
        let path = files::clean_path(&query.path).to_string_lossy().to_string();
        all.into_iter().filter(|f| f.path == path).collect()
    };

    if selected.is_empty() {
        return if query.path.is_empty() {
            Err(ApiError::InvalidRequest("no files marked".into()))
        } else {
            Err(ApiError::NotFound("file not in marked list".into()))
        };
    }

    if selected.len() == 1 && !selected[0].is_dir {
        let file = &selected[0];
        let response = stream_file(Path::new(&file.path), &file.name).await?;
        state.marked.remove(&file.path);
        return Ok(response);
    }

    let name = files::marked_zip_name(&selected);
    let to_zip = selected.clone();
    let (spool, added) = tokio::task::spawn_blocking(move || files::zip_marked(&to_zip))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(format!("zip failed: {}", e)))?;
    state.marked.remove_paths(&added);
    Ok(stream_spool(spool, &name))
}

// ── clipboard ───────────────────────────────────────────────────────

pub async fn clipboard_get(State(state): State<AppState>) -> String {
    state.clipboard.get()
}

pub async fn clipboard_post(State(state): State<AppState>, body: String) -> StatusCode {
    state.clipboard.set(body);
    StatusCode::NO_CONTENT
}

pub async fn clipboard_version(State(state): State<AppState>) -> String {
    state.clipboard.version().to_string()
}
