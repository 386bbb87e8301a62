//! HTTP request handlers for robotscrape-api.

use std::sync::Arc;

use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use robotscrape_core::pipeline::PipelineOutcome;
use robotscrape_core::{Error, JobStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;
use crate::middleware::{require_auth, AuthContext, RequestContext};
use crate::validation::{self, BatchRequestBody, ExtractRequestBody, ScheduleRequestBody};
use crate::AppState;

const IDEMPOTENCY_TTL_HOURS: i64 = 48;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
const DEFAULT_MAX_BATCH_SIZE: usize = 20;
const USAGE_LOG_WINDOW: i64 = 5000;

fn anonymous_mode(state: &AppState) -> bool {
    state.robot.config().auth.anonymous_mode
}

// === Health & discovery ===

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    service: &'static str,
    request_id: String,
}

pub async fn health(Extension(ctx): Extension<RequestContext>) -> Response {
    Json(HealthResponse {
        ok: true,
        service: "robotscrape",
        request_id: ctx.request_id,
    })
    .into_response()
}

pub async fn openapi() -> Response {
    Json(serde_json::json!({
        "openapi": "3.0.3",
        "info": { "title": "robotscrape", "version": "1" },
        "paths": {
            "/health": {"get": {"summary": "Liveness probe"}},
            "/extract": {"post": {"summary": "Synchronous or asynchronous extraction"}},
            "/batch": {"post": {"summary": "Submit a batch of extractions"}},
            "/jobs": {"get": {"summary": "List jobs"}},
            "/jobs/{id}": {"get": {"summary": "Get a job"}},
            "/jobs/{id}/result": {"get": {"summary": "Download a completed job's result"}},
            "/schedules": {"get": {"summary": "List schedules"}, "post": {"summary": "Create a schedule"}},
            "/schedules/{id}": {"patch": {"summary": "Update a schedule"}, "delete": {"summary": "Remove a schedule"}},
            "/usage": {"get": {"summary": "Usage summary"}},
            "/usage/export": {"get": {"summary": "Usage CSV export"}},
            "/webhook/test": {"post": {"summary": "Send a signed test webhook"}},
        },
    }))
    .into_response()
}

// === Extract ===

#[derive(Serialize)]
struct CacheMeta {
    hit: bool,
}

#[derive(Serialize)]
struct ExtractResponseBody {
    success: bool,
    data: Value,
    meta: ExtractMeta,
}

#[derive(Serialize)]
struct ExtractMeta {
    url: String,
    token_usage: i64,
    cache: CacheMeta,
}

#[derive(Serialize)]
struct QueuedResponseBody {
    job_id: String,
    status: &'static str,
    status_url: String,
}

pub async fn extract(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    match extract_inner(&state, &ctx, &headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn extract_inner(state: &AppState, ctx: &RequestContext, headers: &HeaderMap, body: axum::body::Bytes) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let max_body_bytes = state
        .robot
        .config()
        .server
        .as_ref()
        .map(|s| s.max_body_mb as usize * 1024 * 1024)
        .unwrap_or(5 * 1024 * 1024);
    if body.len() > max_body_bytes {
        return Err(err(ctx, Error::PayloadTooLarge));
    }

    let idempotency_key = header_value(headers, "x-idempotency-key");
    if let Some(key) = &idempotency_key {
        if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(err(ctx, Error::BadRequest("idempotency key too long".into())));
        }
        let body_hash = robotscrape_core::crypto::sha256_hex(&body);
        if let Some(entry) = state.robot.store().get_idempotency_entry(key).await.map_err(|e| err(ctx, e))? {
            if entry.expires_at > Utc::now() && entry.request_hash == body_hash {
                let _ = state
                    .robot
                    .store()
                    .insert_event_log(&uuid::Uuid::new_v4().to_string(), auth.api_key_id(), "idempotency_hit", None)
                    .await;
                let status = StatusCode::from_u16(entry.status_code as u16).unwrap_or(StatusCode::OK);
                let value: Value = serde_json::from_str(&entry.response_body).unwrap_or(Value::Null);
                return Ok((status, Json(value)).into_response());
            }
        }
    }

    let request_body: ExtractRequestBody =
        serde_json::from_slice(&body).map_err(|e| err(ctx, Error::BadRequest(format!("invalid request body: {e}"))))?;
    let (params, is_async, webhook_url, webhook_secret) = validation::validate_extract(request_body).await.map_err(|e| err(ctx, e))?;

    let api_key_id = if auth.is_authenticated() {
        let authorized = state
            .robot
            .authorize_and_consume(auth.raw_key().unwrap_or_default(), 1)
            .await
            .map_err(|e| err(ctx, e))?;
        Some(authorized.api_key_id)
    } else {
        None
    };

    let (status, response) = if is_async {
        let job_id = state
            .robot
            .submit_job(api_key_id.as_deref(), &params, webhook_url.as_deref(), webhook_secret.as_deref())
            .await
            .map_err(|e| err(ctx, e))?;
        let body = QueuedResponseBody {
            status_url: format!("/jobs/{job_id}"),
            job_id,
            status: "queued",
        };
        (StatusCode::ACCEPTED, Json(serde_json::to_value(body).unwrap_or(Value::Null)).into_response())
    } else {
        let outcome = state.robot.extract_sync(&params).await.map_err(|e| err(ctx, e))?;
        let (data, token_usage, cache_hit) = match outcome {
            PipelineOutcome::CacheHit { data, token_usage } => (data, token_usage, true),
            PipelineOutcome::Completed { data, token_usage, .. } => (data, token_usage, false),
            PipelineOutcome::Blocked { .. } => return Err(err(ctx, Error::Blocked)),
        };
        let body = ExtractResponseBody {
            success: true,
            data,
            meta: ExtractMeta {
                url: params.url.clone(),
                token_usage,
                cache: CacheMeta { hit: cache_hit },
            },
        };
        let mut response = Json(body).into_response();
        if cache_hit {
            response.headers_mut().insert("x-cache-hit", "true".parse().unwrap());
        }
        (StatusCode::OK, response)
    };

    if let Some(key) = idempotency_key {
        let cache_hit_header = response.headers().get("x-cache-hit").cloned();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap_or_default();
        let body_hash = robotscrape_core::crypto::sha256_hex(&body);
        let expires_at = Utc::now() + ChronoDuration::hours(IDEMPOTENCY_TTL_HOURS);
        let response_body = String::from_utf8_lossy(&bytes).to_string();
        let _ = state
            .robot
            .store()
            .insert_idempotency_entry(&key, &body_hash, status.as_u16() as i64, &response_body, expires_at)
            .await;
        let mut replayed = (status, [(axum::http::header::CONTENT_TYPE, "application/json")], bytes).into_response();
        if let Some(value) = cache_hit_header {
            replayed.headers_mut().insert("x-cache-hit", value);
        }
        return Ok(replayed);
    }

    Ok((status, response).into_response())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn err(ctx: &RequestContext, e: Error) -> ApiError {
    ApiError::new(ctx.request_id.clone(), e)
}

// === Batch ===

#[derive(Serialize)]
struct BatchResponseBody {
    job_ids: Vec<String>,
    status_url: String,
    count: usize,
}

pub async fn batch(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<BatchRequestBody>,
) -> Response {
    match batch_inner(&state, &ctx, body).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn batch_inner(state: &AppState, ctx: &RequestContext, body: BatchRequestBody) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    validation::validate_batch(&body, DEFAULT_MAX_BATCH_SIZE).await.map_err(|e| err(ctx, e))?;

    let count = body.urls.len() as i64;
    let api_key_id = if auth.is_authenticated() {
        let authorized = state
            .robot
            .authorize_and_consume(auth.raw_key().unwrap_or_default(), count)
            .await
            .map_err(|e| err(ctx, e))?;
        Some(authorized.api_key_id)
    } else {
        None
    };

    let mut job_ids = Vec::with_capacity(body.urls.len());
    for url in &body.urls {
        let params = robotscrape_core::ExtractParams {
            url: url.clone(),
            fields: body.fields.clone(),
            schema: body.schema.clone(),
            instructions: body.instructions.clone(),
            options: body.options.clone(),
        };
        let job_id = state
            .robot
            .submit_job(api_key_id.as_deref(), &params, body.webhook_url.as_deref(), body.webhook_secret.as_deref())
            .await
            .map_err(|e| err(ctx, e))?;
        job_ids.push(job_id);
    }

    let _ = state
        .robot
        .store()
        .insert_event_log(&uuid::Uuid::new_v4().to_string(), api_key_id.as_deref(), "batch_created", None)
        .await;

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchResponseBody {
            status_url: "/jobs".to_string(),
            count: job_ids.len(),
            job_ids,
        }),
    )
        .into_response())
}

// === Jobs ===

#[derive(Deserialize)]
pub struct JobListQuery {
    pub limit: Option<i64>,
    pub status: Option<String>,
}

#[derive(Serialize)]
struct JobsListResponse {
    data: Vec<robotscrape_core::Job>,
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<JobListQuery>,
) -> Response {
    match list_jobs_inner(&state, &ctx, query).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn list_jobs_inner(state: &AppState, ctx: &RequestContext, query: JobListQuery) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let status = query.status.as_deref().and_then(JobStatus::parse);
    let scope = if anonymous_mode(state) { None } else { auth.api_key_id() };
    let jobs = state.robot.list_jobs(scope, status, query.limit.unwrap_or(50)).await.map_err(|e| err(ctx, e))?;
    Ok(Json(JobsListResponse { data: jobs }).into_response())
}

#[derive(Serialize)]
struct JobResponse {
    data: robotscrape_core::Job,
}

pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    match get_job_inner(&state, &ctx, &id).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn get_job_inner(state: &AppState, ctx: &RequestContext, id: &str) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let job = load_owned_job(state, ctx, &auth, id).await?;
    Ok(Json(JobResponse { data: job }).into_response())
}

async fn load_owned_job(state: &AppState, ctx: &RequestContext, auth: &AuthContext, id: &str) -> Result<robotscrape_core::Job, ApiError> {
    let job = state
        .robot
        .get_job(id)
        .await
        .map_err(|e| err(ctx, e))?
        .ok_or_else(|| err(ctx, Error::NotFound(format!("job {id}"))))?;

    if !anonymous_mode(state) {
        if job.api_key_id.as_deref() != auth.api_key_id() {
            return Err(err(ctx, Error::NotFound(format!("job {id}"))));
        }
    }
    Ok(job)
}

pub async fn get_job_result(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    match get_job_result_inner(&state, &ctx, &id).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn get_job_result_inner(state: &AppState, ctx: &RequestContext, id: &str) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let job = load_owned_job(state, ctx, &auth, id).await?;

    if !job.status().is_terminal() {
        return Err(err(ctx, Error::NotReady));
    }
    if job.status() != JobStatus::Completed {
        return Err(err(ctx, Error::NotFound(format!("job {id} did not complete"))));
    }
    let path = job.result_path.ok_or_else(|| err(ctx, Error::NotFound(format!("job {id} has no result"))))?;
    let bytes = state
        .robot
        .blobs()
        .get(&path)
        .await
        .map_err(|_| err(ctx, Error::NotFound(format!("result blob missing for job {id}"))))?;

    Ok(([(axum::http::header::CONTENT_TYPE, "application/json")], bytes).into_response())
}

// === Schedules ===

#[derive(Serialize)]
struct SchedulesListResponse {
    data: Vec<robotscrape_core::Schedule>,
}

pub async fn list_schedules(State(state): State<Arc<AppState>>, Extension(ctx): Extension<RequestContext>) -> Response {
    match list_schedules_inner(&state, &ctx).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn list_schedules_inner(state: &AppState, ctx: &RequestContext) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let scope = if anonymous_mode(state) { None } else { auth.api_key_id() };
    let schedules = state.robot.store().list_schedules(scope).await.map_err(|e| err(ctx, e))?;
    Ok(Json(SchedulesListResponse { data: schedules }).into_response())
}

#[derive(Serialize)]
struct ScheduleCreatedResponse {
    schedule_id: String,
    status: &'static str,
}

pub async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<ScheduleRequestBody>,
) -> Response {
    match create_schedule_inner(&state, &ctx, body).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn create_schedule_inner(state: &AppState, ctx: &RequestContext, body: ScheduleRequestBody) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    validation::validate_schedule(&body).await.map_err(|e| err(ctx, e))?;

    let next_run_at = robotscrape_core::schedule::next_fire_after(&body.cron, Utc::now()).map_err(|e| err(ctx, e))?;
    let params = robotscrape_core::ExtractParams {
        url: body.url.clone(),
        fields: body.fields,
        schema: body.schema,
        instructions: body.instructions,
        options: body.options,
    };
    let id = uuid::Uuid::new_v4().to_string();
    state
        .robot
        .store()
        .create_schedule(
            &id,
            auth.api_key_id(),
            &body.cron,
            &body.url,
            &params,
            body.webhook_url.as_deref(),
            body.webhook_secret.as_deref(),
            next_run_at,
        )
        .await
        .map_err(|e| err(ctx, e))?;

    Ok((StatusCode::CREATED, Json(ScheduleCreatedResponse { schedule_id: id, status: "active" })).into_response())
}

#[derive(Deserialize)]
pub struct SchedulePatchBody {
    pub cron: Option<String>,
    pub url: Option<String>,
    pub fields: Option<Vec<String>>,
    pub schema: Option<Value>,
    pub instructions: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn update_schedule(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<SchedulePatchBody>,
) -> Response {
    match update_schedule_inner(&state, &ctx, &id, body).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn update_schedule_inner(state: &AppState, ctx: &RequestContext, id: &str, body: SchedulePatchBody) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let existing = state
        .robot
        .store()
        .get_schedule(id)
        .await
        .map_err(|e| err(ctx, e))?
        .ok_or_else(|| err(ctx, Error::NotFound(format!("schedule {id}"))))?;

    if !anonymous_mode(state) && existing.api_key_id.as_deref() != auth.api_key_id() {
        return Err(err(ctx, Error::NotFound(format!("schedule {id}"))));
    }

    if let Some(cron) = &body.cron {
        robotscrape_core::schedule::validate(cron).map_err(|e| err(ctx, e))?;
    }
    if let Some(url) = &body.url {
        robotscrape_core::security::validate_outbound_url(url, false).await.map_err(|e| err(ctx, e))?;
    }
    if let Some(webhook_url) = body.webhook_url.as_deref() {
        robotscrape_core::security::validate_outbound_url(webhook_url, true).await.map_err(|e| err(ctx, e))?;
    }

    let next_run_at = match &body.cron {
        Some(cron) => Some(robotscrape_core::schedule::next_fire_after(cron, Utc::now()).map_err(|e| err(ctx, e))?),
        None => None,
    };

    let params = if body.fields.is_some() || body.schema.is_some() || body.instructions.is_some() {
        let mut existing_params = existing.params().map_err(|e| err(ctx, e))?;
        if let Some(fields) = body.fields {
            existing_params.fields = fields;
        }
        if body.schema.is_some() {
            existing_params.schema = body.schema;
        }
        if body.instructions.is_some() {
            existing_params.instructions = body.instructions;
        }
        Some(existing_params)
    } else {
        None
    };

    state
        .robot
        .store()
        .update_schedule(
            id,
            body.cron.as_deref(),
            body.url.as_deref(),
            params.as_ref(),
            body.webhook_url.as_ref().map(|s| Some(s.as_str())),
            body.webhook_secret.as_ref().map(|s| Some(s.as_str())),
            next_run_at,
            body.is_active,
        )
        .await
        .map_err(|e| err(ctx, e))?;

    Ok(StatusCode::OK.into_response())
}

pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Response {
    match delete_schedule_inner(&state, &ctx, &id).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn delete_schedule_inner(state: &AppState, ctx: &RequestContext, id: &str) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let existing = state
        .robot
        .store()
        .get_schedule(id)
        .await
        .map_err(|e| err(ctx, e))?
        .ok_or_else(|| err(ctx, Error::NotFound(format!("schedule {id}"))))?;

    if !anonymous_mode(state) && existing.api_key_id.as_deref() != auth.api_key_id() {
        return Err(err(ctx, Error::NotFound(format!("schedule {id}"))));
    }

    state.robot.store().delete_schedule(id).await.map_err(|e| err(ctx, e))?;
    Ok(StatusCode::OK.into_response())
}

// === Usage ===

#[derive(Serialize)]
struct UsageSummary {
    total_requests: usize,
    completed: usize,
    failed: usize,
    blocked: usize,
    total_token_usage: i64,
}

#[derive(Serialize)]
struct UsageDayBucket {
    date: String,
    requests: usize,
    token_usage: i64,
}

#[derive(Serialize)]
struct UsageResponse {
    summary: UsageSummary,
    series: Vec<UsageDayBucket>,
    recent: Vec<robotscrape_core::ScrapeLog>,
}

pub async fn usage(State(state): State<Arc<AppState>>, Extension(ctx): Extension<RequestContext>) -> Response {
    match usage_inner(&state, &ctx).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn usage_inner(state: &AppState, ctx: &RequestContext) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let scope = if anonymous_mode(state) { None } else { auth.api_key_id() };
    let logs = state.robot.store().list_scrape_logs(scope, USAGE_LOG_WINDOW).await.map_err(|e| err(ctx, e))?;

    let summary = summarize(&logs);
    let series = bucket_by_day(&logs);
    let recent = logs.into_iter().take(50).collect();

    Ok(Json(UsageResponse { summary, series, recent }).into_response())
}

pub async fn usage_export(State(state): State<Arc<AppState>>, Extension(ctx): Extension<RequestContext>) -> Response {
    match usage_export_inner(&state, &ctx).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn usage_export_inner(state: &AppState, ctx: &RequestContext) -> Result<Response, ApiError> {
    let auth = require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    let scope = if anonymous_mode(state) { None } else { auth.api_key_id() };
    let logs = state.robot.store().list_scrape_logs(scope, USAGE_LOG_WINDOW).await.map_err(|e| err(ctx, e))?;

    let mut csv = String::from("id,url,status,token_usage,latency_ms,blocked,created_at\n");
    for log in &logs {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            csv_escape(&log.id),
            csv_escape(&log.url),
            csv_escape(&log.status),
            log.token_usage.unwrap_or(0),
            log.latency_ms.unwrap_or(0),
            log.blocked,
            log.created_at.to_rfc3339(),
        ));
    }

    Ok(([(axum::http::header::CONTENT_TYPE, "text/csv")], csv).into_response())
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn summarize(logs: &[robotscrape_core::ScrapeLog]) -> UsageSummary {
    let mut summary = UsageSummary {
        total_requests: logs.len(),
        completed: 0,
        failed: 0,
        blocked: 0,
        total_token_usage: 0,
    };
    for log in logs {
        match log.status.as_str() {
            "completed" => summary.completed += 1,
            "failed" => summary.failed += 1,
            "blocked" => summary.blocked += 1,
            _ => {}
        }
        summary.total_token_usage += log.token_usage.unwrap_or(0);
    }
    summary
}

fn bucket_by_day(logs: &[robotscrape_core::ScrapeLog]) -> Vec<UsageDayBucket> {
    let mut buckets: std::collections::BTreeMap<String, (usize, i64)> = std::collections::BTreeMap::new();
    let cutoff = Utc::now() - ChronoDuration::days(30);
    for log in logs {
        if log.created_at < cutoff {
            continue;
        }
        let day = log.created_at.format("%Y-%m-%d").to_string();
        let entry = buckets.entry(day).or_insert((0, 0));
        entry.0 += 1;
        entry.1 += log.token_usage.unwrap_or(0);
    }
    buckets
        .into_iter()
        .map(|(date, (requests, token_usage))| UsageDayBucket { date, requests, token_usage })
        .collect()
}

// === Webhook test ===

#[derive(Deserialize)]
pub struct WebhookTestBody {
    pub url: String,
    pub secret: Option<String>,
}

#[derive(Serialize)]
struct WebhookTestResponse {
    delivered: bool,
}

pub async fn webhook_test(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<WebhookTestBody>,
) -> Response {
    match webhook_test_inner(&state, &ctx, body).await {
        Ok(r) => r,
        Err(e) => e.into_response(),
    }
}

async fn webhook_test_inner(state: &AppState, ctx: &RequestContext, body: WebhookTestBody) -> Result<Response, ApiError> {
    require_auth(ctx, anonymous_mode(state)).map_err(|e| ApiError::new(ctx.request_id.clone(), e.error))?;
    robotscrape_core::security::validate_outbound_url(&body.url, true).await.map_err(|e| err(ctx, e))?;

    let secret = body.secret.or_else(|| state.robot.default_webhook_secret());
    let payload = robotscrape_core::webhook::WebhookPayload {
        job_id: "test".to_string(),
        status: "test".to_string(),
        result_path: None,
        data: Some(serde_json::json!({"message": "this is a test webhook from robotscrape"})),
        error: None,
    };

    let outcome = robotscrape_core::webhook::send_webhook(state.robot.store(), &body.url, secret.as_deref(), &payload)
        .await
        .map_err(|e| err(ctx, e))?;

    let delivered = matches!(outcome, robotscrape_core::webhook::DeliveryOutcome::Delivered);
    Ok(Json(WebhookTestResponse { delivered }).into_response())
}
