mod config;
mod dataset;
mod ebay;
mod http;
mod identifier;
mod metrics;
mod models;
mod pipeline;
mod session;
mod storage;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::AppConfig;
use dataset::{DatasetError, DatasetSummary};
use ebay::{EbayImageClient, ImageLookup, LookupError};
use identifier::{InvalidIdentifier, ItemId};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, CsvContentRequest, ItemImagesResponse, SaveCsvResponse};
use pipeline::Pipeline;
use serde_json::json;
use session::{EnrichmentSession, SessionError, SessionStatus};
use std::{net::SocketAddr, sync::Arc};
use storage::{CsvStore, PersistenceError};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "enricher.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Arc::new(AppConfig::from_env());
    if config.ebay.credentials().is_none() {
        warn!(
            target = "enricher.api",
            "EBAY_CLIENT_ID / EBAY_CLIENT_SECRET not set; image lookups will fail until configured"
        );
    }
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let state = AppState::new(config.clone(), prometheus_handle);
    info!(
        target = "enricher.api",
        sandbox = config.ebay.sandbox,
        marketplace = config.ebay.marketplace.ebay_code(),
        csv = %state.store.primary_path().display(),
        backup = %state.store.backup_path().display(),
        "storage and ebay settings loaded"
    );
    restore_saved_csv(&state).await;
    let app = router(state);

    let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    info!(target = "enricher.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
    lookup: Arc<EbayImageClient>,
    store: CsvStore,
    session: EnrichmentSession<EbayImageClient>,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
}

impl AppState {
    fn new(config: Arc<AppConfig>, prometheus_handle: PrometheusHandle) -> Self {
        let lookup = Arc::new(EbayImageClient::new(&config));
        let store = CsvStore::new(&config.storage);
        let pipeline = Pipeline::new(lookup.clone(), store.clone(), &config.enrichment);
        let openapi = serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
            .unwrap_or(json!({"openapi": "3.0.3"}));
        Self {
            config,
            lookup,
            store,
            session: EnrichmentSession::new(pipeline),
            openapi: Arc::new(openapi),
            prometheus_handle,
        }
    }
}

/// Reloads the last persisted CSV into the session so a restart can resume.
async fn restore_saved_csv(state: &AppState) {
    match state.store.load().await {
        Ok(Some(text)) => match state.session.load(&text).await {
            Ok(summary) => info!(
                target = "enricher.api",
                total = summary.total,
                pending = summary.pending,
                "restored saved csv"
            ),
            Err(err) => warn!(target = "enricher.api", "saved csv not restored: {err}"),
        },
        Ok(None) => {}
        Err(err) => warn!(target = "enricher.api", "saved csv not readable: {err}"),
    }
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);
    let body_limit = state.config.body_limit;

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/item-images", get(missing_item_id))
        .route("/item-images/{item_id}", get(item_images))
        .route("/save-csv", post(save_csv))
        .route("/dataset", post(load_dataset))
        .route("/dataset/download", get(download_dataset))
        .nest(
            "/enrichment",
            Router::new()
                .route("/start", post(start_enrichment))
                .route("/pause", post(pause_enrichment))
                .route("/resume", post(resume_enrichment))
                .route("/status", get(enrichment_status)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "listing-images-rs",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

async fn missing_item_id() -> AppError {
    AppError::MissingItemId
}

/// Image URLs of one eBay item.
///
/// - Method: `GET`
/// - Path: `/item-images/{item_id}`
/// - Response: `{success: true, images}`; failures carry `error`, `code`, `message`
///   with a status mirroring the cause (400, 404, 429, 500 or the upstream status).
async fn item_images(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<ItemImagesResponse>, AppError> {
    crate::metrics::inc_requests("/item-images");
    let item_id = ItemId::parse(&raw_id).map_err(AppError::InvalidItemId)?;
    info!(
        target = "enricher.api",
        raw = %raw_id,
        item_id = %item_id,
        "item images requested"
    );
    let images = state
        .lookup
        .lookup(&item_id)
        .await
        .map_err(AppError::Lookup)?;
    Ok(Json(ItemImagesResponse {
        success: true,
        images,
    }))
}

/// Replace the stored CSV, keeping the previous version as backup.
///
/// - Method: `POST`
/// - Path: `/save-csv`
/// - Body: `{csvContent: string}`
async fn save_csv(
    State(state): State<AppState>,
    payload: Result<Json<CsvContentRequest>, JsonRejection>,
) -> Result<Json<SaveCsvResponse>, AppError> {
    crate::metrics::inc_requests("/save-csv");
    let content = csv_content(payload)?;
    state.store.save(&content).await.map_err(AppError::Persistence)?;
    Ok(Json(SaveCsvResponse {
        success: true,
        message: "CSV saved successfully".into(),
    }))
}

async fn load_dataset(
    State(state): State<AppState>,
    payload: Result<Json<CsvContentRequest>, JsonRejection>,
) -> Result<Json<DatasetSummary>, AppError> {
    crate::metrics::inc_requests("/dataset");
    let content = csv_content(payload)?;
    let summary = state.session.load(&content).await?;
    Ok(Json(summary))
}

async fn download_dataset(State(state): State<AppState>) -> Result<Response, AppError> {
    crate::metrics::inc_requests("/dataset/download");
    let csv = state.session.export().await?;
    let filename = format!(
        "ebay-with-photos-{}.csv",
        chrono::Utc::now().format("%Y-%m-%d")
    );
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    Ok((
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

async fn start_enrichment(State(state): State<AppState>) -> Result<Json<SessionStatus>, AppError> {
    crate::metrics::inc_requests("/enrichment/start");
    Ok(Json(state.session.start().await?))
}

async fn pause_enrichment(State(state): State<AppState>) -> Result<Json<SessionStatus>, AppError> {
    crate::metrics::inc_requests("/enrichment/pause");
    Ok(Json(state.session.pause().await?))
}

async fn resume_enrichment(
    State(state): State<AppState>,
) -> Result<Json<SessionStatus>, AppError> {
    crate::metrics::inc_requests("/enrichment/resume");
    Ok(Json(state.session.resume().await?))
}

async fn enrichment_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.status().await)
}

fn csv_content(
    payload: Result<Json<CsvContentRequest>, JsonRejection>,
) -> Result<String, AppError> {
    let Json(request) = payload.map_err(AppError::Body)?;
    request.content().ok_or(AppError::MissingCsv)
}

#[derive(Debug)]
enum AppError {
    MissingItemId,
    InvalidItemId(InvalidIdentifier),
    Lookup(LookupError),
    MissingCsv,
    Body(JsonRejection),
    Persistence(PersistenceError),
    Session(SessionError),
}

impl From<SessionError> for AppError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::MissingItemId => (StatusCode::BAD_REQUEST, ApiError::new("Item ID is required")),
            AppError::InvalidItemId(err) => (
                StatusCode::BAD_REQUEST,
                ApiError::new("Invalid item ID format")
                    .with_code(400)
                    .with_message(err.to_string()),
            ),
            AppError::Lookup(err) => return lookup_error_response(err),
            AppError::MissingCsv => (
                StatusCode::BAD_REQUEST,
                ApiError::new("No CSV content provided"),
            ),
            AppError::Body(rejection) => {
                let status = rejection.status();
                warn!(
                    target = "enricher.api",
                    status = status.as_u16(),
                    "request body rejected: {}",
                    rejection.body_text()
                );
                (
                    status,
                    ApiError::new("Invalid request body")
                        .with_code(status.as_u16())
                        .with_message(rejection.body_text()),
                )
            }
            AppError::Persistence(err) => {
                error!(target = "enricher.api", "csv save failed: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("Failed to save CSV").with_message(err.to_string()),
                )
            }
            AppError::Session(err) => {
                let status = match &err {
                    SessionError::NoDataset | SessionError::Dataset(DatasetError::Parse(_)) => {
                        StatusCode::BAD_REQUEST
                    }
                    SessionError::Dataset(DatasetError::Serialize(_)) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                    SessionError::AlreadyRunning
                    | SessionError::NotRunning
                    | SessionError::NotPaused => StatusCode::CONFLICT,
                };
                (
                    status,
                    ApiError::new("Enrichment session error")
                        .with_code(status.as_u16())
                        .with_message(err.to_string()),
                )
            }
        };
        (status, Json(payload)).into_response()
    }
}

fn lookup_error_response(err: LookupError) -> Response {
    let status =
        StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    warn!(
        target = "enricher.api",
        kind = err.kind(),
        status = status.as_u16(),
        "lookup failed: {err}"
    );
    let error = match err {
        LookupError::Configuration(_) | LookupError::Auth(_) => "Application Token not configured",
        _ => "Browse API failure",
    };
    let payload = ApiError::new(error)
        .with_code(status.as_u16())
        .with_message(err.to_string());
    let mut response = (status, Json(payload)).into_response();
    if let LookupError::RateLimited {
        retry_after: Some(secs),
    } = err
        && let Ok(value) = HeaderValue::from_str(&secs.to_string())
    {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
