//! HTTP API server.
//!
//! Serves the portfolio JSON API, the uploads directory (local media
//! backend), and optionally the built frontend with `index.html` fallback
//! for client-side routing.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/health` | Health check (returns version) |
//! | `GET`, `POST` | `/api/projects` | List (filters: `featured`, `category`, `technology`) / create |
//! | `GET`, `PUT`, `DELETE` | `/api/projects/{id}` | Read / merge update / delete |
//! | `GET`, `POST` | `/api/content` | List (filters: `featured`, `platform`, `tag`) / create |
//! | `GET`, `PUT`, `DELETE` | `/api/content/{id}` | Read / merge update / delete |
//! | `GET`, `PUT` | `/api/profile` | Read / merge update |
//! | `GET`  | `/api/search?q=&limit=` | Search projects and content |
//! | `GET`  | `/api/search/projects?q=` | Search projects |
//! | `GET`  | `/api/search/content?q=` | Search content |
//! | `POST` | `/api/upload` | Multipart upload (every part with a file name) |
//! | `POST` | `/api/upload/base64` | `{ filename, data }` data-URL upload |
//! | `GET`  | `/api/uploads` | List stored media |
//! | `DELETE` | `/api/upload/{name}` | Delete stored media |
//! | `POST` | `/api/contact` | Contact form |
//! | `POST` | `/api/chat` | AI chat assistant |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "project not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `chat_disabled` (400), `not_found` (404),
//! `conflict` (409), `payload_too_large` (413), `unsupported_media_type` (415),
//! `internal` (500), `upstream` (502).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the frontend dev
//! server can call the API directly.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::chat::{self, ChatRequest};
use crate::config::Config;
use crate::contact::{self, ContactMessage, DeliveryError};
use crate::media::{
    create_media_store, decode_data_url, store_upload, validate_name, MediaError, MediaResolver,
    MediaStore, StoredMedia, UploadPolicy,
};
use crate::models::{ContentItem, Project};
use crate::search;
use crate::store::{ContentFilter, ProjectFilter, Store, StoreError};

/// Multipart framing and JSON envelope allowance on top of `uploads.max_bytes`.
const BODY_OVERHEAD: usize = 64 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: Arc<Store>,
    media: Arc<dyn MediaStore>,
    policy: Arc<UploadPolicy>,
    resolver: MediaResolver,
}

impl AppState {
    /// Build state from configuration, selecting the media backend.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let media = create_media_store(config)?;
        Self::with_media(config, media)
    }

    /// Build state with an explicit media backend.
    pub fn with_media(config: &Config, media: Arc<dyn MediaStore>) -> anyhow::Result<Self> {
        let policy = UploadPolicy::from_config(&config.uploads)?;
        let resolver = MediaResolver::new(media.public_base());
        Ok(Self {
            config: Arc::new(config.clone()),
            store: Arc::new(Store::open(config.store.path.clone())),
            media,
            policy: Arc::new(policy),
            resolver,
        })
    }

    /// Serialize a record for a response, resolving its media references.
    fn present<T: Serialize>(&self, record: &T) -> Value {
        let mut value = serde_json::to_value(record).unwrap_or(Value::Null);
        self.resolver.resolve_value(&mut value);
        value
    }

    fn present_all<T: Serialize>(&self, records: &[T]) -> Value {
        Value::Array(records.iter().map(|r| self.present(r)).collect())
    }
}

/// Starts the HTTP server.
///
/// Creates the document if it does not exist yet, binds to `[server].bind`,
/// and serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    if state.store.init().await? {
        info!(path = %config.store.path.display(), "created empty document");
    }

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("folio listening on http://{}", config.server.bind);
    info!("Health check: http://{}/api/health", config.server.bind);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_bytes = state.policy.max_bytes();
    let upload_routes = Router::new()
        .route("/api/upload", post(handle_upload))
        .route("/api/upload/base64", post(handle_upload_base64))
        .layer(DefaultBodyLimit::max(upload_body_limit(max_bytes)));

    let mut app = Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(get_project).put(update_project).delete(delete_project),
        )
        .route("/api/content", get(list_content).post(create_content))
        .route(
            "/api/content/{id}",
            get(get_content).put(update_content).delete(delete_content),
        )
        .route("/api/profile", get(get_profile).put(update_profile))
        .route("/api/search", get(search_all))
        .route("/api/search/projects", get(search_projects))
        .route("/api/search/content", get(search_content))
        .route("/api/uploads", get(list_uploads))
        .route("/api/upload/{name}", delete(delete_upload))
        .route("/api/contact", post(handle_contact))
        .route("/api/chat", post(handle_chat))
        // Keep unknown API paths out of the SPA fallback.
        .route("/api", any(api_not_found))
        .route("/api/{*rest}", any(api_not_found))
        .merge(upload_routes);

    let public_base = state.config.uploads.public_base.trim_end_matches('/');
    if state.config.media.is_local() && public_base.starts_with('/') && public_base.len() > 1 {
        app = app.nest_service(public_base, ServeDir::new(&state.config.uploads.dir));
    }

    if let Some(ref dir) = state.config.server.static_dir {
        let spa = ServeDir::new(dir).not_found_service(ServeFile::new(dir.join("index.html")));
        app = app.fallback_service(spa);
    }

    app.layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request body cap for the upload routes. Base64 inflates payloads by a third.
fn upload_body_limit(max_bytes: usize) -> usize {
    (max_bytes / 3)
        .saturating_mul(4)
        .saturating_add(BODY_OVERHEAD)
}

async fn api_not_found(uri: axum::http::Uri) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("no such endpoint: {}", uri.path()),
    )
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(message: impl Into<String>) -> AppError {
    let message = message.into();
    error!("{}", message);
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

fn upstream(message: impl Into<String>) -> AppError {
    let message = message.into();
    warn!("{}", message);
    AppError::new(StatusCode::BAD_GATEWAY, "upstream", message)
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            StoreError::Conflict { .. } => {
                AppError::new(StatusCode::CONFLICT, "conflict", err.to_string())
            }
            StoreError::Invalid(msg) => bad_request(msg),
            StoreError::Io { .. } | StoreError::Parse { .. } => internal(err.to_string()),
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Empty
            | MediaError::InvalidName(_)
            | MediaError::InvalidData(_)
            | MediaError::Unsupported(_) => bad_request(err.to_string()),
            MediaError::TooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", err.to_string())
            }
            MediaError::UnsupportedType(_) => AppError::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "unsupported_media_type",
                err.to_string(),
            ),
            MediaError::NotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "not_found", err.to_string())
            }
            MediaError::Io(_) => internal(err.to_string()),
            MediaError::Backend(_) => upstream(err.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, AppError>;

/// Unwraps a JSON body, turning axum's rejection into our error contract.
fn json_body(
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Value> {
    body.map(|Json(v)| v)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    media: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        media: state.media.backend(),
    })
}

// ============ Projects ============

async fn list_projects(
    State(state): State<AppState>,
    Query(filter): Query<ProjectFilter>,
) -> ApiResult<Json<Value>> {
    let projects = state.store.list_projects(&filter).await?;
    Ok(Json(state.present_all(&projects)))
}

async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let project = state.store.get_project(&id).await?;
    Ok(Json(state.present(&project)))
}

async fn create_project(
    State(state): State<AppState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let project = state.store.create_project(json_body(body)?).await?;
    info!(id = %project.id, "project created");
    Ok((StatusCode::CREATED, Json(state.present(&project))))
}

async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Json<Value>> {
    let project = state.store.update_project(&id, json_body(body)?).await?;
    info!(id = %project.id, "project updated");
    Ok(Json(state.present(&project)))
}

async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let project: Project = state.store.delete_project(&id).await?;
    info!(id = %project.id, "project deleted");
    Ok(Json(json!({ "deleted": state.present(&project) })))
}

// ============ Content ============

async fn list_content(
    State(state): State<AppState>,
    Query(filter): Query<ContentFilter>,
) -> ApiResult<Json<Value>> {
    let items = state.store.list_content(&filter).await?;
    Ok(Json(state.present_all(&items)))
}

async fn get_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let item = state.store.get_content(&id).await?;
    Ok(Json(state.present(&item)))
}

async fn create_content(
    State(state): State<AppState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let item = state.store.create_content(json_body(body)?).await?;
    info!(id = %item.id, "content created");
    Ok((StatusCode::CREATED, Json(state.present(&item))))
}

async fn update_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Json<Value>> {
    let item = state.store.update_content(&id, json_body(body)?).await?;
    info!(id = %item.id, "content updated");
    Ok(Json(state.present(&item)))
}

async fn delete_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let item: ContentItem = state.store.delete_content(&id).await?;
    info!(id = %item.id, "content deleted");
    Ok(Json(json!({ "deleted": state.present(&item) })))
}

// ============ Profile ============

async fn get_profile(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let profile = state.store.get_profile().await?;
    Ok(Json(state.present(&profile)))
}

async fn update_profile(
    State(state): State<AppState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Json<Value>> {
    let profile = state.store.update_profile(json_body(body)?).await?;
    info!("profile updated");
    Ok(Json(state.present(&profile)))
}

// ============ Search ============

#[derive(Debug, Deserialize)]
struct SearchParams {
    #[serde(default, alias = "query")]
    q: String,
    limit: Option<usize>,
}

async fn search_all(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Value>> {
    let doc = state.store.snapshot().await?;
    let results = search::search_all(&doc, &params.q, params.limit);
    Ok(Json(json!({
        "query": results.query,
        "projects": state.present_all(&results.projects),
        "content": state.present_all(&results.content),
    })))
}

async fn search_projects(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Value>> {
    let doc = state.store.snapshot().await?;
    let projects = search::search_projects(&doc, &params.q, params.limit);
    Ok(Json(state.present_all(&projects)))
}

async fn search_content(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Value>> {
    let doc = state.store.snapshot().await?;
    let items = search::search_content(&doc, &params.q, params.limit);
    Ok(Json(state.present_all(&items)))
}

// ============ Uploads ============

#[derive(Serialize)]
struct UploadResponse {
    files: Vec<StoredMedia>,
}

/// Handler for `POST /api/upload`.
///
/// Every multipart part that carries a file name is stored; other parts are
/// ignored. If any file is rejected, the files already stored by this
/// request are removed again.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut stored: Vec<StoredMedia> = Vec::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                rollback(&state, &stored).await;
                return Err(multipart_error(e));
            }
        };

        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                rollback(&state, &stored).await;
                return Err(multipart_error(e));
            }
        };

        match store_upload(
            state.media.as_ref(),
            &state.policy,
            Some(&file_name),
            content_type.as_deref(),
            bytes.to_vec(),
        )
        .await
        {
            Ok(item) => {
                info!(name = %item.name, size = item.size, "media stored");
                stored.push(item);
            }
            Err(e) => {
                rollback(&state, &stored).await;
                return Err(e.into());
            }
        }
    }

    if stored.is_empty() {
        return Err(bad_request("upload contained no files"));
    }
    Ok((StatusCode::CREATED, Json(UploadResponse { files: stored })))
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", e.body_text())
    } else {
        bad_request(e.body_text())
    }
}

async fn rollback(state: &AppState, stored: &[StoredMedia]) {
    for item in stored {
        if let Err(e) = state.media.delete(&item.name).await {
            warn!(name = %item.name, error = %e, "failed to remove partial upload");
        }
    }
}

#[derive(Debug, Deserialize)]
struct Base64Upload {
    #[serde(alias = "fileName", alias = "name")]
    filename: Option<String>,
    data: String,
}

/// Handler for `POST /api/upload/base64`.
async fn handle_upload_base64(
    State(state): State<AppState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let upload: Base64Upload =
        serde_json::from_value(json_body(body)?).map_err(|e| bad_request(e.to_string()))?;
    let (content_type, bytes) = decode_data_url(&upload.data)?;

    let item = store_upload(
        state.media.as_ref(),
        &state.policy,
        upload.filename.as_deref(),
        content_type.as_deref(),
        bytes,
    )
    .await?;
    info!(name = %item.name, size = item.size, "media stored");

    Ok((StatusCode::CREATED, Json(UploadResponse { files: vec![item] })))
}

async fn list_uploads(State(state): State<AppState>) -> ApiResult<Json<UploadResponse>> {
    let files = state.media.list().await?;
    Ok(Json(UploadResponse { files }))
}

async fn delete_upload(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    validate_name(&name)?;
    state.media.delete(&name).await?;
    info!(name = %name, "media deleted");
    Ok(Json(json!({ "deleted": name })))
}

// ============ POST /api/contact ============

async fn handle_contact(
    State(state): State<AppState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Json<Value>> {
    let message: ContactMessage =
        serde_json::from_value(json_body(body)?).map_err(|e| bad_request(e.to_string()))?;
    let message = message.validate().map_err(bad_request)?;

    match contact::deliver(&state.config.contact, &message).await {
        Ok(delivery) => Ok(Json(json!({ "success": true, "delivery": delivery }))),
        Err(e @ DeliveryError::Outbox(_)) => Err(internal(e.to_string())),
        Err(e @ DeliveryError::Relay(_)) => Err(upstream(e.to_string())),
    }
}

// ============ POST /api/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<Value>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<Json<chat::ChatReply>> {
    if !state.config.chat.is_enabled() {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "chat_disabled",
            "chat assistant is not configured",
        ));
    }

    let request: ChatRequest =
        serde_json::from_value(json_body(body)?).map_err(|e| bad_request(e.to_string()))?;
    request.validate().map_err(bad_request)?;

    let doc = state.store.snapshot().await?;
    let reply = chat::complete(&state.config.chat, &doc, &request)
        .await
        .map_err(|e| upstream(format!("chat: {:#}", e)))?;
    Ok(Json(reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_status_mapping() {
        use crate::models::RecordKind;

        let e: AppError = StoreError::NotFound {
            kind: RecordKind::Project,
            id: "x".to_string(),
        }
        .into();
        assert_eq!(e.status, StatusCode::NOT_FOUND);
        assert_eq!(e.code, "not_found");

        let e: AppError = StoreError::Conflict {
            kind: RecordKind::Content,
            id: "x".to_string(),
        }
        .into();
        assert_eq!(e.status, StatusCode::CONFLICT);

        let e: AppError = StoreError::Invalid("bad".to_string()).into();
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.message, "bad");
    }

    #[test]
    fn test_upload_body_limit_saturates() {
        assert_eq!(upload_body_limit(3 * 1024), 4 * 1024 + BODY_OVERHEAD);
        assert_eq!(upload_body_limit(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_media_error_status_mapping() {
        let e: AppError = MediaError::TooLarge { size: 2, max: 1 }.into();
        assert_eq!(e.status, StatusCode::PAYLOAD_TOO_LARGE);

        let e: AppError = MediaError::UnsupportedType("text/html".to_string()).into();
        assert_eq!(e.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(e.code, "unsupported_media_type");

        let e: AppError = MediaError::Backend("timeout".to_string()).into();
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
    }
}
