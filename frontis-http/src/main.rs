use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use frontis_catalog::{CatalogService, JsonFileCatalogStore};
use frontis_core::{GenerateRequest, Orchestrator};
use frontis_ledger::GenerationLedger;
use frontis_render::{CoverRenderer, TemplateCoverRenderer};
use frontis_types::{ArtifactFormat, CatalogData, CatalogView, SemesterId, StreamId};

mod error;
use error::ApiError;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    admin_key: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let port: u16 = std::env::var("FRONTIS_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5000);
    let admin_key = std::env::var("FRONTIS_ADMIN_KEY").ok();
    let catalog_path =
        std::env::var("FRONTIS_CATALOG_PATH").unwrap_or_else(|_| "./catalog.json".into());
    let ledger_path = std::env::var("FRONTIS_LEDGER_PATH")
        .unwrap_or_else(|_| "./frontpage_ledger.jsonl".into());
    let template_path =
        std::env::var("FRONTIS_TEMPLATE_PATH").unwrap_or_else(|_| "static/template.png".into());
    let font_path =
        std::env::var("FRONTIS_FONT_PATH").unwrap_or_else(|_| "static/Sans.ttf".into());

    if admin_key.is_none() {
        tracing::warn!("FRONTIS_ADMIN_KEY not set; admin endpoints will refuse all requests");
    }

    let catalog = Arc::new(CatalogService::new(Arc::new(JsonFileCatalogStore::new(
        catalog_path,
    ))));
    let renderer: Arc<dyn CoverRenderer> =
        Arc::new(TemplateCoverRenderer::new(template_path, font_path));
    let ledger = Arc::new(GenerationLedger::open(ledger_path)?);
    let orchestrator = Arc::new(Orchestrator::new(catalog, renderer, ledger));

    let state = AppState {
        orchestrator,
        admin_key,
    };

    let admin = Router::new()
        .route(
            "/subjects",
            get(admin_list_catalog)
                .post(admin_add_subject)
                .put(admin_update_subject)
                .delete(admin_remove_subject),
        )
        .route("/streams", post(admin_upsert_stream).delete(admin_remove_stream))
        .route("/config", get(admin_config))
        .route("/logs", get(admin_logs))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    let app = Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/frontpages", get(catalog_view).post(generate))
        .route("/api/stats", get(stats))
        .nest("/admin", admin)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("0.0.0.0:{port}").parse()?;
    tracing::info!("frontis HTTP server listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index() -> Redirect {
    Redirect::to("/frontpages")
}

async fn healthz() -> &'static str {
    "ok"
}

async fn catalog_view(State(state): State<AppState>) -> Result<Json<CatalogView>, ApiError> {
    Ok(Json(state.orchestrator.list_catalog().await?))
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    name: String,
    roll: String,
    reg: String,
    semester: SemesterId,
    stream: StreamId,
    subject_id: Uuid,
    #[serde(default)]
    format: ArtifactFormat,
}

async fn generate(
    State(state): State<AppState>,
    Json(params): Json<GenerateParams>,
) -> Result<Response, ApiError> {
    let cover = state
        .orchestrator
        .generate(GenerateRequest {
            name: params.name,
            roll: params.roll,
            reg: params.reg,
            semester_id: params.semester,
            subject_id: params.subject_id,
            stream_id: params.stream,
            format: params.format,
        })
        .await?;

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(cover.mime_type));
    let disposition = format!("attachment; filename=\"{}\"", cover.file_name);
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    if let Some(warning) = &cover.ledger_warning {
        if let Ok(value) = HeaderValue::from_str(warning) {
            headers.insert("x-ledger-warning", value);
        }
    }
    Ok((StatusCode::OK, headers, cover.bytes).into_response())
}

async fn stats(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let count = state.orchestrator.total_generated()?;
    Ok(Json(json!({ "generated_count": count })))
}

/// Gate for everything nested under /admin: `X-Admin-Key` header or
/// `admin_key` query parameter must match the configured key.
async fn admin_auth(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_key.as_deref() else {
        return Err(ApiError::AdminKeyMissing);
    };
    let provided = headers
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| params.get("admin_key").cloned());
    if provided.as_deref() != Some(expected) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}

async fn admin_list_catalog(State(state): State<AppState>) -> Result<Json<CatalogView>, ApiError> {
    Ok(Json(state.orchestrator.list_catalog().await?))
}

#[derive(Debug, Deserialize)]
struct AddSubjectPayload {
    name: String,
    #[serde(default)]
    code: String,
    semester: SemesterId,
}

async fn admin_add_subject(
    State(state): State<AppState>,
    Json(payload): Json<AddSubjectPayload>,
) -> Result<Response, ApiError> {
    let name = require(&payload.name, "name")?;
    let mutation = state
        .orchestrator
        .catalog()
        .add_or_update_subject(&name, &payload.code, payload.semester)
        .await?;
    let body = Json(json!({
        "message": "Subject saved",
        "name": name,
        "subject_id": mutation.subject_id,
    }));
    Ok((StatusCode::CREATED, body).into_response())
}

#[derive(Debug, Deserialize)]
struct UpdateSubjectPayload {
    original_name: String,
    name: String,
    #[serde(default)]
    code: String,
    semester: SemesterId,
}

async fn admin_update_subject(
    State(state): State<AppState>,
    Json(payload): Json<UpdateSubjectPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let original = require(&payload.original_name, "original_name")?;
    let name = require(&payload.name, "name")?;
    let mutation = state
        .orchestrator
        .catalog()
        .rename_or_move_subject(&original, &name, &payload.code, payload.semester)
        .await?;
    Ok(Json(json!({
        "message": "Subject updated",
        "name": name,
        "subject_id": mutation.subject_id,
    })))
}

#[derive(Debug, Deserialize)]
struct RemoveSubjectPayload {
    name: String,
    /// Also drop the retired code, so a re-add starts from the sentinel.
    #[serde(default)]
    remove_code: bool,
    /// When set, removes only this one offering instead of the subject.
    semester: Option<SemesterId>,
}

async fn admin_remove_subject(
    State(state): State<AppState>,
    Json(payload): Json<RemoveSubjectPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let name = require(&payload.name, "name")?;
    match payload.semester {
        Some(semester_id) => {
            state
                .orchestrator
                .catalog()
                .remove_offering(&name, semester_id)
                .await?;
            Ok(Json(json!({ "message": "Offering removed", "name": name })))
        }
        None => {
            state
                .orchestrator
                .catalog()
                .remove_subject(&name, payload.remove_code)
                .await?;
            Ok(Json(json!({ "message": "Subject removed", "name": name })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    id: StreamId,
    #[serde(default)]
    label: String,
}

async fn admin_upsert_stream(
    State(state): State<AppState>,
    Json(payload): Json<StreamPayload>,
) -> Result<Response, ApiError> {
    let label = require(&payload.label, "label")?;
    let stream = state
        .orchestrator
        .catalog()
        .upsert_stream(payload.id, &label)
        .await?;
    let body = Json(json!({
        "message": "Stream label saved",
        "id": stream.id,
        "label": stream.label,
        "short_code": stream.short_code,
    }));
    Ok((StatusCode::CREATED, body).into_response())
}

async fn admin_remove_stream(
    State(state): State<AppState>,
    Json(payload): Json<StreamPayload>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .orchestrator
        .catalog()
        .remove_stream(payload.id)
        .await?;
    Ok(Json(json!({ "message": "Stream label removed", "id": payload.id })))
}

async fn admin_config(State(state): State<AppState>) -> Result<Json<CatalogData>, ApiError> {
    Ok(Json(state.orchestrator.catalog_snapshot().await?))
}

#[derive(Debug, Deserialize)]
struct LogsParams {
    limit: Option<usize>,
}

async fn admin_logs(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let logs = state.orchestrator.recent_logs(params.limit.unwrap_or(50))?;
    Ok(Json(json!({ "logs": logs })))
}

fn require(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("'{field}' is required")));
    }
    Ok(trimmed.to_string())
}
