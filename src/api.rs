use crate::{
    export,
    jobs::{
        broadcast::{BroadcastRequest, Broadcaster, Submission},
        collect::Collector,
        JobId, JobRecord, Registry,
    },
    messenger::Messenger,
    promo::{self, PromoHandle},
    Error,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use axum_macros::FromRequest;
use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{path::PathBuf, sync::Arc};
use tokio_graceful_shutdown::SubsystemHandle;

pub async fn subsystem(
    addr: std::net::SocketAddr,
    state: ApiState,
    handle: SubsystemHandle,
) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");
    tokio::select! {
        result = axum::serve(listener, router(state)) => result.map_err(Error::from),
        _ = handle.on_shutdown_requested() => Ok(())
    }
}

fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route("/collect", post(collect_submit))
        .route("/collect/{job_id}", get(job_status))
        .route("/collect/{job_id}/cancel", post(job_cancel))
        .route("/broadcast", post(broadcast_submit))
        .route("/broadcast/stats", get(broadcast_stats))
        .route("/broadcast/{job_id}", get(job_status))
        .route("/broadcast/{job_id}/cancel", post(job_cancel))
        .route("/broadcast/{job_id}/log", get(broadcast_log))
        .route("/members", get(members_list))
        .route("/exports", get(exports_list))
        .route("/exports/clear", post(exports_clear))
        .route("/promo/targets", get(targets_list).post(target_add))
        .route("/promo/targets/{id}", delete(target_remove))
        .route("/promo/targets/{id}/enable", post(target_enable))
        .route("/promo/targets/{id}/disable", post(target_disable))
        .route("/promo/messages", get(messages_list).post(message_add))
        .route("/promo/messages/{id}", delete(message_remove))
        .route("/promo/schedule", get(schedule_list).put(schedule_set))
        .route("/promo/status", get(promo_status))
        .route("/promo/pause", post(promo_pause))
        .route("/promo/resume", post(promo_resume))
        .route("/promo/sync", post(promo_sync));

    Router::new().nest("/api/v1", api).with_state(state)
}

#[derive(Clone)]
pub struct ApiState {
    pub db: sqlx::SqlitePool,
    pub registry: Arc<Registry>,
    pub collector: Collector,
    pub broadcaster: Broadcaster,
    pub promo: Arc<PromoHandle>,
    pub client: Arc<dyn Messenger>,
    pub source_guild: Option<u64>,
    pub promo_offset: FixedOffset,
    pub export_dir: PathBuf,
}

#[derive(Deserialize)]
struct CollectSubmitBody {
    guild_id: u64,
}

async fn collect_submit(
    State(state): State<ApiState>,
    ApiJson(body): ApiJson<CollectSubmitBody>,
) -> Result<(StatusCode, ApiJson<JobRecord>), ApiError> {
    let record = state.collector.submit(body.guild_id).await;
    Ok((StatusCode::ACCEPTED, ApiJson(record)))
}

async fn job_status(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<ApiJson<JobRecord>, ApiError> {
    let job_id = JobId::from(job_id.as_str());
    let record = state
        .registry
        .get(&job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no job {job_id}")))?;
    Ok(ApiJson(record))
}

async fn job_cancel(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
) -> Result<ApiJson<JobRecord>, ApiError> {
    let job_id = JobId::from(job_id.as_str());
    let record = state
        .registry
        .request_cancel(&job_id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no job {job_id}")))?;
    Ok(ApiJson(record))
}

#[derive(Deserialize)]
struct BroadcastSubmitBody {
    text: String,
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    source_guild: Option<u64>,
    #[serde(default)]
    interval_secs: Option<f64>,
}

async fn broadcast_submit(
    State(state): State<ApiState>,
    ApiJson(body): ApiJson<BroadcastSubmitBody>,
) -> Result<(StatusCode, ApiJson<JobRecord>), ApiError> {
    let text = body.text.trim();
    if text.is_empty() {
        return Err(ApiError::invalid_request("text must not be empty"));
    }
    let request = BroadcastRequest {
        text: text.to_string(),
        limit: body.limit,
        source_guild: body.source_guild,
        interval_secs: body.interval_secs,
    };
    match state.broadcaster.submit(request).await? {
        Submission::Started(record) => Ok((StatusCode::ACCEPTED, ApiJson(record))),
        Submission::Empty => Err(ApiError::invalid_request("no pending recipients")),
    }
}

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default)]
    offset: i64,
    #[serde(default = "default_page_limit")]
    limit: i64,
}

fn default_page_limit() -> i64 {
    50
}

async fn broadcast_log(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<ApiJson<Vec<store::outreach::Attempt>>, ApiError> {
    let attempts = store::outreach::for_job(&state.db, &job_id, page.offset, page.limit).await?;
    Ok(ApiJson(attempts))
}

#[derive(Deserialize)]
struct StatsQuery {
    #[serde(default = "default_stats_days")]
    days: i64,
}

fn default_stats_days() -> i64 {
    7
}

async fn broadcast_stats(
    State(state): State<ApiState>,
    Query(query): Query<StatsQuery>,
) -> Result<ApiJson<Vec<store::outreach::DailyStat>>, ApiError> {
    Ok(ApiJson(
        store::outreach::daily_stats(&state.db, query.days).await?,
    ))
}

#[derive(Deserialize)]
struct MembersQuery {
    #[serde(default = "default_page_limit")]
    limit: i64,
}

async fn members_list(
    State(state): State<ApiState>,
    Query(query): Query<MembersQuery>,
) -> Result<ApiJson<Vec<store::members::Member>>, ApiError> {
    Ok(ApiJson(store::members::recent(&state.db, query.limit).await?))
}

async fn exports_list(
    State(state): State<ApiState>,
) -> Result<ApiJson<Vec<export::ExportEntry>>, ApiError> {
    Ok(ApiJson(export::list(state.export_dir.clone()).await?))
}

async fn exports_clear(
    State(state): State<ApiState>,
) -> Result<ApiJson<serde_json::Value>, ApiError> {
    let removed = export::clear(state.export_dir.clone()).await?;
    Ok(ApiJson(json!({ "removed": removed })))
}

async fn targets_list(
    State(state): State<ApiState>,
) -> Result<ApiJson<Vec<store::targets::Target>>, ApiError> {
    Ok(ApiJson(store::targets::all(&state.db).await?))
}

#[derive(Deserialize)]
struct TargetAddBody {
    id: u64,
    #[serde(default)]
    title: Option<String>,
}

async fn target_add(
    State(state): State<ApiState>,
    ApiJson(body): ApiJson<TargetAddBody>,
) -> Result<ApiJson<serde_json::Value>, ApiError> {
    store::targets::add(&state.db, body.id as i64, body.title.as_deref()).await?;
    state.promo.wake();
    Ok(ApiJson(json!({ "id": body.id })))
}

async fn target_remove(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<ApiJson<serde_json::Value>, ApiError> {
    if !store::targets::remove(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("no target {id}")));
    }
    state.promo.wake();
    Ok(ApiJson(json!({ "removed": id })))
}

async fn target_enable(
    state: State<ApiState>,
    id: Path<i64>,
) -> Result<ApiJson<serde_json::Value>, ApiError> {
    set_target_enabled(state, id, true).await
}

async fn target_disable(
    state: State<ApiState>,
    id: Path<i64>,
) -> Result<ApiJson<serde_json::Value>, ApiError> {
    set_target_enabled(state, id, false).await
}

async fn set_target_enabled(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    enabled: bool,
) -> Result<ApiJson<serde_json::Value>, ApiError> {
    if !store::targets::set_enabled(&state.db, id, enabled).await? {
        return Err(ApiError::NotFound(format!("no target {id}")));
    }
    state.promo.wake();
    Ok(ApiJson(json!({ "id": id, "enabled": enabled })))
}

async fn messages_list(
    State(state): State<ApiState>,
) -> Result<ApiJson<Vec<store::messages::PromoMessage>>, ApiError> {
    Ok(ApiJson(store::messages::all(&state.db).await?))
}

#[derive(Deserialize)]
struct MessageAddBody {
    body: String,
}

async fn message_add(
    State(state): State<ApiState>,
    ApiJson(body): ApiJson<MessageAddBody>,
) -> Result<ApiJson<serde_json::Value>, ApiError> {
    let text = body.body.trim();
    if text.is_empty() {
        return Err(ApiError::invalid_request("body must not be empty"));
    }
    let id = store::messages::add(&state.db, text).await?;
    state.promo.wake();
    Ok(ApiJson(json!({ "id": id })))
}

async fn message_remove(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<ApiJson<serde_json::Value>, ApiError> {
    if !store::messages::remove(&state.db, id).await? {
        return Err(ApiError::NotFound(format!("no message {id}")));
    }
    state.promo.wake();
    Ok(ApiJson(json!({ "removed": id })))
}

async fn schedule_list(
    State(state): State<ApiState>,
) -> Result<ApiJson<Vec<store::schedule::SlotTime>>, ApiError> {
    Ok(ApiJson(store::schedule::all(&state.db).await?))
}

#[derive(Deserialize)]
struct ScheduleSetBody {
    slot: store::Slot,
    hour: u32,
    minute: u32,
}

async fn schedule_set(
    State(state): State<ApiState>,
    ApiJson(body): ApiJson<ScheduleSetBody>,
) -> Result<ApiJson<Vec<store::schedule::SlotTime>>, ApiError> {
    if body.hour > 23 || body.minute > 59 {
        return Err(ApiError::invalid_request("hour must be 0-23 and minute 0-59"));
    }
    store::schedule::set(&state.db, body.slot, body.hour, body.minute).await?;
    state.promo.wake();
    Ok(ApiJson(store::schedule::all(&state.db).await?))
}

#[derive(Deserialize)]
struct StatusQuery {
    #[serde(default)]
    day: Option<String>,
}

#[derive(Serialize)]
struct PromoStatus {
    day: String,
    paused: bool,
    slots: Vec<store::history::SlotStat>,
    targets: store::targets::CatalogCounts,
    messages: store::targets::CatalogCounts,
    history: Vec<store::history::PromoRecord>,
}

async fn promo_status(
    State(state): State<ApiState>,
    Query(query): Query<StatusQuery>,
) -> Result<ApiJson<PromoStatus>, ApiError> {
    let day = query
        .day
        .unwrap_or_else(|| promo::slots::day_key(Utc::now(), state.promo_offset));
    let status = PromoStatus {
        paused: state.promo.is_paused(),
        slots: store::history::slot_counts(&state.db, &day).await?,
        targets: store::targets::counts(&state.db).await?,
        messages: store::messages::counts(&state.db).await?,
        history: store::history::for_day(&state.db, &day).await?,
        day,
    };
    Ok(ApiJson(status))
}

async fn promo_pause(State(state): State<ApiState>) -> ApiJson<serde_json::Value> {
    state.promo.pause();
    tracing::info!("promo posting paused");
    ApiJson(json!({ "paused": true }))
}

async fn promo_resume(State(state): State<ApiState>) -> ApiJson<serde_json::Value> {
    state.promo.resume();
    tracing::info!("promo posting resumed");
    ApiJson(json!({ "paused": false }))
}

async fn promo_sync(
    State(state): State<ApiState>,
) -> Result<ApiJson<store::targets::ReconcileStats>, ApiError> {
    let source_guild = state
        .source_guild
        .ok_or_else(|| ApiError::invalid_request("no promo source guild configured"))?;
    let stats = promo::sync_targets(&state.db, state.client.as_ref(), source_guild).await?;
    state.promo.wake();
    Ok(ApiJson(stats))
}

// Create our own JSON extractor by wrapping `axum::Json`. This makes it easy to override the
// rejection and provide our own which formats errors to match our application.
//
// `axum::Json` responds with plain text if the input is invalid.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(T);

impl<T> IntoResponse for ApiJson<T>
where
    axum::Json<T>: IntoResponse,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

#[derive(Debug)]
pub enum ApiError {
    /// Resource not found
    NotFound(String),
    /// Internal error occurred
    Internal(String),
    /// Bad request supplied
    Request(String),
}

impl ApiError {
    pub fn invalid_request(msg: &str) -> Self {
        Self::Request(msg.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        tracing::error!(?value, "service error");
        Self::Internal("internal service error".to_string())
    }
}

impl From<store::Error> for ApiError {
    fn from(value: store::Error) -> Self {
        Self::from(anyhow::Error::from(value))
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(value: axum::extract::rejection::JsonRejection) -> Self {
        Self::Request(value.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(serde::Serialize)]
        struct ErrorResponse {
            message: String,
        }

        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Self::Request(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        (status, ApiJson(ErrorResponse { message })).into_response()
    }
}
