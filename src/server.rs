//! HTTP API.
//!
//! A thin axum layer over the triplet, upload, similarity, and image
//! services. Every route except `/health` lives under [`API_PREFIX`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/config` | Lock timeout for the frontend |
//! | `GET`  | `/triplet?validation=` | Lease the next unlabeled triplet |
//! | `POST` | `/triplet?triplet_id=&label=&validation=` | Label a triplet |
//! | `GET`  | `/triplet/stats` | Labeled / unlabeled counts |
//! | `GET`  | `/download?validation=` | CSV of labeled triplets (admin) |
//! | `DELETE` | `/delete?validation=` | Empty a collection (admin) |
//! | `POST` | `/upload` | Multipart zip upload, processed in the background (admin) |
//! | `GET`  | `/upload` | Latest upload progress (admin) |
//! | `GET`  | `/upload/{id}` | Progress of one upload (admin) |
//! | `GET`  | `/similarity/{item1_id}/{item2_id}` | Cosine similarity |
//! | `GET`  | `/neighbors/{item_id}?nearest_neighbors_count=` | Nearest items |
//! | `GET`  | `/images/{image_id}?canonical=` | Image bytes |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "No unlabeled triplet found." } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `forbidden` (403),
//! `not_found` (404), `internal` (500).

use axum::{
    body::Bytes,
    extract::{
        rejection::QueryRejection, DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use labelizer_core::lease::LeasePolicy;
use labelizer_core::models::{Collection, Label, TripletStats, UploadStatus};
use labelizer_core::store::Store;

use crate::auth::{user_from_headers, User};
use crate::config::Config;
use crate::error::LabelError;
use crate::export::{download_file_name, export_labeled};
use crate::images::{content_type, read_image};
use crate::sqlite_store::SqliteStore;
use crate::triplets::{self, TripletResponse};
use crate::upload::{self, ReceivedArchive};

pub const API_PREFIX: &str = "/api/labelizer/v1";

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    fn user(&self, headers: &HeaderMap) -> Result<User, AppError> {
        Ok(user_from_headers(headers, &self.config.auth)?)
    }

    fn admin(&self, headers: &HeaderMap) -> Result<User, AppError> {
        let user = self.user(headers)?;
        user.require_admin()?;
        Ok(user)
    }
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_upload_mb * 1024 * 1024;
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/config", get(handle_config))
        .route("/triplet", get(handle_get_triplet).post(handle_set_label))
        .route("/triplet/stats", get(handle_stats))
        .route("/download", get(handle_download))
        .route("/delete", axum::routing::delete(handle_delete))
        .route(
            "/upload",
            get(handle_latest_upload)
                .post(handle_upload)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/upload/{id}", get(handle_upload_by_id))
        .route("/similarity/{item1_id}/{item2_id}", get(handle_similarity))
        .route("/neighbors/{item_id}", get(handle_neighbors))
        .route("/images/{image_id}", get(handle_image));

    Router::new()
        .route("/health", get(handle_health))
        .nest(API_PREFIX, api)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    crate::migrate::migrate_pool(&pool).await?;
    std::fs::create_dir_all(&config.storage.scratch_dir)?;

    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config.clone(), Arc::new(SqliteStore::new(pool)));
    let app = router(state);

    info!(bind = %bind_addr, prefix = API_PREFIX, "labelizer listening");
    println!("Labelizer listening on http://{}{}", bind_addr, API_PREFIX);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
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
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }
}

impl From<LabelError> for AppError {
    fn from(err: LabelError) -> Self {
        let (status, code) = match &err {
            LabelError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            LabelError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            LabelError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            LabelError::Storage(e) => {
                error!(error = %e, "request failed");
                return Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal",
                    message: "internal error".to_string(),
                };
            }
            _ => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        Self {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::bad_request(rejection.body_text())
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

type ApiResult<T> = Result<T, AppError>;

// ============ Query strings ============

#[derive(Deserialize, Default)]
struct ValidationQuery {
    #[serde(default)]
    validation: bool,
}

impl ValidationQuery {
    fn collection(&self) -> Collection {
        Collection::from_validation_flag(self.validation)
    }
}

#[derive(Deserialize)]
struct LabelQuery {
    triplet_id: i64,
    label: Label,
    #[serde(default)]
    validation: bool,
}

#[derive(Deserialize)]
struct NeighborsQuery {
    nearest_neighbors_count: usize,
}

#[derive(Deserialize, Default)]
struct ImageQuery {
    #[serde(default)]
    canonical: bool,
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /config ============

#[derive(Serialize)]
struct ConfigResponse {
    lock_timeout_in_seconds: u64,
}

async fn handle_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        lock_timeout_in_seconds: state.config.labeling.lock_timeout_secs,
    })
}

// ============ Triplets ============

async fn handle_get_triplet(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ValidationQuery>, QueryRejection>,
) -> ApiResult<Json<TripletResponse>> {
    state.user(&headers)?;
    let Query(query) = query?;
    let policy = LeasePolicy::new(state.config.labeling.lock_timeout());
    let triplet =
        triplets::acquire_next_unlabeled(state.store.as_ref(), query.collection(), &policy).await?;
    Ok(Json(triplet.into()))
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_set_label(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<LabelQuery>, QueryRejection>,
) -> ApiResult<Json<MessageResponse>> {
    let user = state.user(&headers)?;
    let Query(query) = query?;
    let collection = Collection::from_validation_flag(query.validation);
    triplets::set_label(
        state.store.as_ref(),
        collection,
        query.triplet_id,
        query.label,
        &user.uid,
    )
    .await?;
    Ok(Json(MessageResponse {
        message: "Label set successfully.".to_string(),
    }))
}

async fn handle_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<TripletStats>> {
    state.user(&headers)?;
    Ok(Json(triplets::triplet_stats(state.store.as_ref()).await?))
}

async fn handle_download(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ValidationQuery>, QueryRejection>,
) -> ApiResult<Response> {
    state.admin(&headers)?;
    let Query(query) = query?;
    let collection = query.collection();
    let body = export_labeled(state.store.as_ref(), collection).await?;
    let file_name = download_file_name(collection, chrono::Utc::now());
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename={}", file_name),
            ),
        ],
        body,
    )
        .into_response())
}

#[derive(Serialize)]
struct DeleteResponse {
    message: String,
    deleted: u64,
}

async fn handle_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ValidationQuery>, QueryRejection>,
) -> ApiResult<Json<DeleteResponse>> {
    state.admin(&headers)?;
    let Query(query) = query?;
    let collection = query.collection();
    let deleted = triplets::delete_all(state.store.as_ref(), collection).await?;
    Ok(Json(DeleteResponse {
        message: format!("All {}s deleted.", collection.noun()),
        deleted,
    }))
}

// ============ Uploads ============

#[derive(Serialize)]
struct UploadAccepted {
    id: i64,
    message: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadAccepted>)> {
    state.admin(&headers)?;

    let mut file: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::bad_request(e.body_text()))?;
            file = Some(bytes);
        }
    }
    let bytes = file.ok_or_else(|| AppError::bad_request("multipart field 'file' is required"))?;

    let scratch_root = state.config.storage.scratch_dir.clone();
    let archive = tokio::task::spawn_blocking(move || ReceivedArchive::save(&scratch_root, &bytes))
        .await
        .map_err(|e| LabelError::Storage(anyhow::anyhow!("blocking task failed: {}", e)))??;

    let status = upload::start_upload(state.config.clone(), state.store.clone(), archive).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            id: status.id,
            message: "Data upload starts in the background.".to_string(),
        }),
    ))
}

async fn handle_latest_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<UploadStatus>> {
    state.admin(&headers)?;
    Ok(Json(upload::latest_status(state.store.as_ref()).await?))
}

async fn handle_upload_by_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<UploadStatus>> {
    state.admin(&headers)?;
    Ok(Json(upload::status_by_id(state.store.as_ref(), id).await?))
}

// ============ Similarity ============

#[derive(Serialize)]
struct SimilarityResponse {
    similarity_score: f32,
}

async fn handle_similarity(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((item1_id, item2_id)): Path<(String, String)>,
) -> ApiResult<Json<SimilarityResponse>> {
    state.user(&headers)?;
    let similarity_score =
        crate::similarity::similarity_score(state.store.as_ref(), &item1_id, &item2_id).await?;
    Ok(Json(SimilarityResponse { similarity_score }))
}

#[derive(Serialize)]
struct NeighborsResponse {
    neighbors: Vec<String>,
}

async fn handle_neighbors(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(item_id): Path<String>,
    query: Result<Query<NeighborsQuery>, QueryRejection>,
) -> ApiResult<Json<NeighborsResponse>> {
    state.user(&headers)?;
    let Query(query) = query?;
    let neighbors = crate::similarity::nearest_neighbors(
        state.store.as_ref(),
        &item_id,
        query.nearest_neighbors_count,
    )
    .await?;
    Ok(Json(NeighborsResponse {
        neighbors: neighbors.into_iter().map(|n| n.id).collect(),
    }))
}

// ============ Images ============

async fn handle_image(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
    query: Result<Query<ImageQuery>, QueryRejection>,
) -> ApiResult<Response> {
    state.user(&headers)?;
    let Query(query) = query?;
    let bytes = read_image(&state.config, &image_id, query.canonical).await?;
    info!(image_id = %image_id, canonical = query.canonical, "image served");
    Ok((
        [(header::CONTENT_TYPE, content_type(&state.config.images.extension))],
        bytes,
    )
        .into_response())
}
