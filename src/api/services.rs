use std::collections::HashMap;
use std::net::SocketAddr;

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::Value;
use tracing::{info, warn};

use super::{
    error::ApiError,
    models::{
        ActiveRequest, ActiveResponse, BufferConfigRequest, DeletedResponse, ExecutionQuery,
        ForwardedView, ForwardingConfigRequest, HealthResponse, ResyncResponse, ScheduleRequest,
        WebhookAccepted,
    },
    state::AppState,
    utils::{read_body, read_json, require_json},
    validation,
};
use crate::buffer::{BufferKey, FlushPolicy, PendingMessage, value_to_key};
use crate::ledger::NewReceivedMessage;

const RECENT_LIMIT: usize = 100;

fn body_limit(state: &AppState) -> usize {
    state.config.server.max_body_bytes.as_usize()
}

/// Health check endpoint (GET /health, GET /api/health)
///
/// Reports the ledger (reachable through the storage pool) and the cron clock.
/// Returns 503 when the ledger cannot be read.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let ledger = match state.storage.call("stats", |ledger| ledger.stats()).await {
        Ok(stats) => {
            components.insert("ledger".to_string(), "healthy".to_string());
            Some(stats)
        }
        Err(err) => {
            warn!(error = %err, "Health check could not read the ledger");
            components.insert("ledger".to_string(), "unhealthy".to_string());
            None
        }
    };

    let scheduler = if state.clock().is_running() { "running" } else { "stopped" };
    components.insert("scheduler".to_string(), scheduler.to_string());

    let healthy = ledger.is_some();
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.metrics.snapshot(),
        ledger,
    };

    (status_code, Json(response))
}

// Schedules

pub async fn list_schedules(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let schedules = state
        .storage
        .call("list_schedules", |ledger| ledger.list_schedules())
        .await?;
    Ok(Json(schedules))
}

pub async fn create_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: ScheduleRequest = read_json(&headers, body, body_limit(&state)).await?;
    let fields = validation::validate_schedule(&request)?;

    let schedule = state
        .synchronizer
        .create(fields, request.active.unwrap_or(true))
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: ScheduleRequest = read_json(&headers, body, body_limit(&state)).await?;
    let fields = validation::validate_schedule(&request)?;

    let schedule = state.synchronizer.update(id, fields).await?;
    Ok(Json(schedule))
}

pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    state.synchronizer.delete(id).await?;
    Ok(Json(DeletedResponse::new(id)))
}

pub async fn toggle_schedule(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let schedule = state.synchronizer.toggle(id).await?;
    Ok(Json(ActiveResponse {
        id,
        active: schedule.active,
    }))
}

pub async fn set_schedule_active(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: ActiveRequest = read_json(&headers, body, body_limit(&state)).await?;
    let active = request
        .active
        .ok_or(validation::RequestValidationError::MissingField("active"))?;

    let schedule = state.synchronizer.set_active(id, active).await?;
    Ok(Json(ActiveResponse {
        id,
        active: schedule.active,
    }))
}

pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ExecutionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let executions = state
        .storage
        .call("list_executions", |ledger| ledger.list_executions(query.schedule_id))
        .await?;
    Ok(Json(executions))
}

// Buffer configs

pub async fn list_buffer_configs(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let configs = state
        .storage
        .call("list_buffer_configs", |ledger| ledger.list_buffer_configs())
        .await?;
    Ok(Json(configs))
}

pub async fn create_buffer_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: BufferConfigRequest = read_json(&headers, body, body_limit(&state)).await?;
    let fields = validation::validate_buffer_config(&request, &state.config.buffer)?;

    let config = state
        .storage
        .call("insert_buffer_config", |ledger| ledger.insert_buffer_config(fields.clone()))
        .await?;
    info!(buffer_config_id = config.id, name = %config.fields.name, "Buffer config created");
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn update_buffer_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: BufferConfigRequest = read_json(&headers, body, body_limit(&state)).await?;

    let current = state
        .storage
        .call("get_buffer_config", |ledger| ledger.get_buffer_config(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("buffer config {id}")))?;
    let fields = validation::merge_buffer_config(&current.fields, &request)?;

    let config = state
        .storage
        .call("update_buffer_config", |ledger| {
            ledger.update_buffer_config(id, fields.clone())
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("buffer config {id}")))?;
    info!(buffer_config_id = id, "Buffer config updated");
    Ok(Json(config))
}

pub async fn delete_buffer_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .storage
        .call("delete_buffer_config", |ledger| ledger.delete_buffer_config(id))
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("buffer config {id}")));
    }
    info!(buffer_config_id = id, "Buffer config deleted");
    Ok(Json(DeletedResponse::new(id)))
}

// Forwarding configs

pub async fn list_forwarding_configs(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let configs = state
        .storage
        .call("list_forwarding_configs", |ledger| ledger.list_forwarding_configs())
        .await?;
    Ok(Json(configs))
}

pub async fn create_forwarding_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: ForwardingConfigRequest = read_json(&headers, body, body_limit(&state)).await?;
    let fields = validation::validate_forwarding_config(&request)?;

    let config = state
        .storage
        .call("insert_forwarding_config", |ledger| {
            ledger.insert_forwarding_config(fields.clone())
        })
        .await?;
    info!(
        forwarding_config_id = config.id,
        buffer_config_id = config.fields.buffer_config_id,
        "Forwarding config created"
    );
    Ok((StatusCode::CREATED, Json(config)))
}

pub async fn update_forwarding_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: ForwardingConfigRequest = read_json(&headers, body, body_limit(&state)).await?;

    let current = state
        .storage
        .call("get_forwarding_config", |ledger| ledger.get_forwarding_config(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("forwarding config {id}")))?;
    let fields = validation::merge_forwarding_config(&current.fields, &request)?;

    let config = state
        .storage
        .call("update_forwarding_config", |ledger| {
            ledger.update_forwarding_config(id, fields.clone())
        })
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("forwarding config {id}")))?;
    info!(forwarding_config_id = id, "Forwarding config updated");
    Ok(Json(config))
}

pub async fn delete_forwarding_config(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state
        .storage
        .call("delete_forwarding_config", |ledger| {
            ledger.delete_forwarding_config(id)
        })
        .await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("forwarding config {id}")));
    }
    info!(forwarding_config_id = id, "Forwarding config deleted");
    Ok(Json(DeletedResponse::new(id)))
}

// Webhooks

/// POST /api/webhook without a buffer id
pub async fn webhook_without_buffer() -> ApiError {
    ApiError::InvalidPayload(
        "use /api/webhook/{buffer_id} to send messages to a buffer".to_string(),
    )
}

/// Webhook ingestion endpoint (POST /api/webhook/{buffer_id})
///
/// ## Flow:
/// 1. Body must be a non-empty JSON object
/// 2. Buffer config must exist and be active (404 otherwise)
/// 3. The message must carry the buffer's filter field; its value selects the batch
/// 4. Persist the ReceivedMessage, then hand it to the debounce buffer
///
/// A size-triggered flush runs before the response is sent; its forward failures are
/// recorded on the messages and logged, never returned to the sender.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(buffer_id): Path<u64>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let (parts, body) = request.into_parts();
    require_json(&parts.headers)?;
    let data = read_body(body, body_limit(&state)).await?;
    let payload: Value = serde_json::from_slice(&data)?;

    let is_empty_object = payload.as_object().is_none_or(|fields| fields.is_empty());
    if is_empty_object {
        return Err(ApiError::InvalidPayload(
            "message must be a non-empty JSON object".to_string(),
        ));
    }

    let config = state
        .storage
        .call("get_buffer_config", |ledger| ledger.get_buffer_config(buffer_id))
        .await?
        .filter(|config| config.fields.active)
        .ok_or_else(|| ApiError::NotFound(format!("active buffer config {buffer_id}")))?;

    let key_field = &config.fields.filter_field;
    let key_value = payload
        .get(key_field)
        .map(value_to_key)
        .ok_or_else(|| ApiError::InvalidPayload(format!("message missing key field: {key_field}")))?;

    let received = state
        .storage
        .call("insert_received", |ledger| {
            ledger.insert_received(NewReceivedMessage {
                payload: payload.clone(),
                source: source.clone(),
                buffer_config_id: buffer_id,
            })
        })
        .await?;
    state.metrics.message_ingested();

    info!(
        buffer_config_id = buffer_id,
        message_id = received.id,
        key = %key_value,
        %source,
        "Webhook message received"
    );

    let key = BufferKey::new(buffer_id, key_value);
    let message = PendingMessage {
        message_id: received.id,
        data: payload,
    };
    if let Err(err) = state
        .buffer
        .ingest(key, message, FlushPolicy::from(&config.fields))
        .await
    {
        warn!(buffer_config_id = buffer_id, message_id = received.id, error = %err, "Size-triggered flush failed");
    }

    Ok((
        StatusCode::CREATED,
        Json(WebhookAccepted {
            status: "buffered".to_string(),
            message_id: received.id,
        }),
    ))
}

// Message history

pub async fn list_received_messages(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .storage
        .call("recent_received", |ledger| ledger.recent_received(RECENT_LIMIT))
        .await?;
    Ok(Json(messages))
}

pub async fn list_forwarded_messages(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let (messages, rules) = state
        .storage
        .call("recent_forwarded", |ledger| {
            Ok((
                ledger.recent_forwarded(RECENT_LIMIT)?,
                ledger.list_forwarding_configs()?,
            ))
        })
        .await?;

    let names: HashMap<u64, String> = rules
        .into_iter()
        .map(|rule| (rule.id, rule.fields.name))
        .collect();
    let views: Vec<ForwardedView> = messages
        .into_iter()
        .map(|message| ForwardedView {
            forwarding_config_name: names.get(&message.forwarding_config_id).cloned(),
            message,
        })
        .collect();
    Ok(Json(views))
}

// Operators

pub async fn resync_triggers(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let registered = state.synchronizer.resync().await?;
    let triggers = state.synchronizer.report().await?;
    Ok(Json(ResyncResponse {
        registered,
        triggers,
    }))
}

pub async fn list_triggers(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let report = state.synchronizer.report().await?;
    Ok(Json(report))
}
