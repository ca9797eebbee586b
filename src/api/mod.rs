//! HTTP intake surface
//!
//! A thin router over the scheduler and verifier: batch/job intake, the P2
//! signature endpoint, status reads, PDF verification, and health.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::{Batch, BatchId, Job, JobId, QrPayloadV2, Template, TemplateId, Tenant, TenantId};
use crate::error::IssuerError;
use crate::pdf::verify::PdfVerifier;
use crate::scheduler::IssuanceScheduler;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<IssuanceScheduler>,
    pub verifier: Arc<PdfVerifier>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tenants", post(create_tenant))
        .route("/templates", post(create_template))
        .route("/batches", post(create_batch))
        .route("/batches/{id}", get(get_batch))
        .route("/batches/{id}/jobs", post(create_job))
        .route("/batches/{id}/pending-signature", get(pending_signature))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/signature", post(submit_signature))
        .route("/verify", post(verify_pdf))
        .with_state(state)
}

/// API error envelope
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.1 }));
        (self.0, body).into_response()
    }
}

impl From<IssuerError> for ApiError {
    fn from(e: IssuerError) -> Self {
        let status = match &e {
            IssuerError::Validation(_) => StatusCode::BAD_REQUEST,
            IssuerError::Crypto(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IssuerError::State { .. } => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, format!("{what} not found"))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "storage": state.scheduler.context().storage.name(),
    }))
}

#[derive(Deserialize)]
struct CreateTenantRequest {
    name: String,
    issuer_public_key: Option<String>,
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<Json<Tenant>, ApiError> {
    let mut tenant = Tenant::new(request.name);
    tenant.issuer_public_key = request.issuer_public_key;
    state
        .scheduler
        .context()
        .store
        .create_tenant(&tenant)
        .await?;
    Ok(Json(tenant))
}

#[derive(Deserialize)]
struct CreateTemplateRequest {
    tenant_id: Uuid,
    name: String,
    content: String,
    #[serde(default)]
    parameters: Vec<String>,
    qr_placement: Option<crate::domain::QrPlacement>,
}

async fn create_template(
    State(state): State<AppState>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<Json<Template>, ApiError> {
    let mut template = Template::new(
        TenantId::from_uuid(request.tenant_id),
        request.name,
        request.content,
    );
    template.parameters = request.parameters;
    template.qr_placement = request.qr_placement;
    state
        .scheduler
        .context()
        .store
        .create_template(&template)
        .await?;
    Ok(Json(template))
}

#[derive(Deserialize)]
struct CreateBatchRequest {
    tenant_id: Uuid,
    template_id: Uuid,
    expiry_date: Option<DateTime<Utc>>,
    invalidation_expiry: Option<DateTime<Utc>>,
    issuer_public_key: Option<String>,
    signing_key: Option<String>,
}

async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<Json<Batch>, ApiError> {
    let mut batch = Batch::new(
        TenantId::from_uuid(request.tenant_id),
        TemplateId::from_uuid(request.template_id),
    );
    batch.expiry_date = request.expiry_date;
    batch.invalidation_expiry = request.invalidation_expiry;
    batch.issuer_public_key = request.issuer_public_key;
    batch.signing_key = request.signing_key;
    state
        .scheduler
        .context()
        .store
        .create_batch(&batch)
        .await?;
    Ok(Json(batch))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Batch>, ApiError> {
    state
        .scheduler
        .context()
        .store
        .get_batch(BatchId::from_uuid(id))
        .await?
        .map(Json)
        .ok_or_else(|| not_found("batch"))
}

/// Jobs awaiting an external signature, in the order their leaves will
/// enter the batch tree.
async fn pending_signature(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state
        .scheduler
        .context()
        .store
        .find_pending_signature(BatchId::from_uuid(id))
        .await?;
    Ok(Json(jobs))
}

#[derive(Deserialize)]
struct CreateJobRequest {
    data: Value,
}

async fn create_job(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<CreateJobRequest>,
) -> Result<Json<Job>, ApiError> {
    let store = &state.scheduler.context().store;
    let batch_id = BatchId::from_uuid(batch_id);
    if store.get_batch(batch_id).await?.is_none() {
        return Err(not_found("batch"));
    }
    let job = Job::new(batch_id, request.data);
    store.create_job(&job).await?;
    Ok(Json(job))
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    state
        .scheduler
        .context()
        .store
        .get_job(JobId::from_uuid(id))
        .await?
        .map(Json)
        .ok_or_else(|| not_found("job"))
}

#[derive(Deserialize)]
struct SubmitSignatureRequest {
    signature: String,
}

async fn submit_signature(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitSignatureRequest>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .scheduler
        .submit_signature(JobId::from_uuid(id), &request.signature)
        .await?;
    Ok(Json(job))
}

/// Verify uploaded PDF bytes. An optional `X-Qr-Payload` header carries the
/// scanned compressed payload for the issuer-key fallback chain.
async fn verify_pdf(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    body: Bytes,
) -> Result<Json<crate::pdf::verify::VerificationReport>, ApiError> {
    if body.is_empty() {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "request body must contain PDF bytes".to_string(),
        ));
    }

    let qr_payload = headers
        .get("x-qr-payload")
        .and_then(|value| value.to_str().ok())
        .and_then(|fragment| QrPayloadV2::decode_fragment(fragment).ok());

    let report = state.verifier.verify(&body, qr_payload.as_ref()).await;
    Ok(Json(report))
}
