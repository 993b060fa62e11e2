//! Axum server and routes.

use crate::auth::caller_from_headers;
use crate::error::ApiError;
use crate::views::{
    self, ActiveEventView, ActiveEventsView, ConsumingEventView, FieldMappingsView,
    FlowStatusView, LastUpdateView, LogEntryView, LogListView, PublishingEventView,
    ScheduleUpdatedView,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, patch, put},
    Json, Router,
};
use relay_control::ControlPlane;
use relay_engine::{
    DeliveryOutcome, InboundEvent, Inbox, OutboundEvent, Publisher, StageOutcome,
};
use relay_types::{
    AuditStore, Authorizer, Broker, Caller, ControlFlag, ControlStore, Direction,
    EnvelopeBuilder, EventStatus, EventStore, Permission, RecordFilter, RelayError,
};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

pub struct AppState {
    pub publisher: Publisher,
    pub inbox: Inbox,
    pub control: ControlPlane,
    pub events: Arc<dyn EventStore>,
    pub authorizer: Arc<dyn Authorizer>,
    pub default_tenant: String,
}

impl AppState {
    pub fn new(
        events: Arc<dyn EventStore>,
        flags: Arc<dyn ControlStore>,
        audit: Arc<dyn AuditStore>,
        broker: Arc<dyn Broker>,
        authorizer: Arc<dyn Authorizer>,
        envelopes: EnvelopeBuilder,
        default_tenant: impl Into<String>,
    ) -> Self {
        let control = ControlPlane::new(Arc::clone(&events), flags, audit);
        Self {
            publisher: Publisher::new(Arc::clone(&events), broker, control.clone(), envelopes),
            inbox: Inbox::new(Arc::clone(&events), control.clone()),
            control,
            events,
            authorizer,
            default_tenant: default_tenant.into(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/v1/publisher/publishing-events",
            get(handle_list_publishing)
                .post(handle_record_publishing)
                .fallback(handle_invalid_route),
        )
        .route(
            "/v1/publisher/publishing-events/:id",
            patch(handle_toggle_publishing).fallback(handle_invalid_route),
        )
        .route(
            "/v1/publisher/publishing-events/:id/logs",
            get(handle_publishing_logs).fallback(handle_invalid_route),
        )
        .route(
            "/v1/publisher/publishing-events/:id/logs/:log_id",
            get(handle_publishing_log_detail).fallback(handle_invalid_route),
        )
        .route(
            "/v1/publisher/publishing-events/:id/redeliver",
            axum::routing::post(handle_redeliver).fallback(handle_invalid_route),
        )
        .route(
            "/v1/publisher/product-control",
            get(handle_publishing_control)
                .patch(handle_set_publishing_control)
                .fallback(handle_invalid_route),
        )
        .route(
            "/v1/consumer/consuming-events",
            get(handle_list_consuming)
                .post(handle_stage_inbound)
                .fallback(handle_invalid_route),
        )
        .route(
            "/v1/consumer/consuming-events/:id",
            patch(handle_toggle_consuming).fallback(handle_invalid_route),
        )
        .route(
            "/v1/consumer/consuming-events/:id/field-mappings",
            put(handle_field_mappings).fallback(handle_invalid_route),
        )
        .route(
            "/v1/consumer/consuming-events/:id/logs",
            get(handle_consuming_logs).fallback(handle_invalid_route),
        )
        .route(
            "/v1/consumer/consuming-events/:id/logs/:log_id",
            get(handle_consuming_log_detail).fallback(handle_invalid_route),
        )
        .route(
            "/v1/consumer/consuming-events/:id/payload",
            get(handle_mapped_payload).fallback(handle_invalid_route),
        )
        .route(
            "/v1/consumer/product-control",
            get(handle_consuming_control)
                .patch(handle_set_consuming_control)
                .fallback(handle_invalid_route),
        )
        .route(
            "/v1/integration/flows/active-events",
            get(handle_active_events).fallback(handle_invalid_route),
        )
        .route(
            "/v1/integration/flows/:id/status",
            get(handle_flow_status).fallback(handle_invalid_route),
        )
        .route(
            "/v1/integration/flows/:id/schedule",
            patch(handle_update_schedule).fallback(handle_invalid_route),
        )
        .route("/health", get(handle_health))
        .fallback(handle_invalid_route)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    tracing::error!(details = %details, "request handler panicked");
    ApiError::internal("Internal server error", details).into_response()
}

/// Error for any path/method pair without a route, worded after the deepest
/// segment that was still recognised.
pub fn routing_error(path: &str) -> ApiError {
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    let message = match parts.as_slice() {
        ["v1"] => "Invalid API path".to_string(),
        ["v1", service, rest @ ..] => {
            let endpoints: &[(&str, &str)] = match *service {
                "publisher" => &[
                    ("publishing-events", "publishing events"),
                    ("product-control", "product control"),
                ],
                "consumer" => &[
                    ("consuming-events", "consuming events"),
                    ("product-control", "product control"),
                ],
                "integration" => &[("flows", "integration flows")],
                _ => return ApiError::bad_request("Invalid service"),
            };
            match rest.first() {
                None => format!("Invalid {} path", service),
                Some(endpoint) => match endpoints.iter().find(|(seg, _)| seg == endpoint) {
                    Some((_, words)) => format!("Invalid {} request", words),
                    None => format!("Invalid {} endpoint", service),
                },
            }
        }
        _ => "Invalid API version".to_string(),
    };
    ApiError::bad_request(message)
}

async fn handle_invalid_route(uri: Uri) -> ApiError {
    routing_error(uri.path())
}

async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    permission: Permission,
) -> Result<Caller, ApiError> {
    let caller = caller_from_headers(headers, &state.default_tenant)?;
    state.authorizer.require(&caller, permission).await?;
    Ok(caller)
}

/// Request body as a JSON object; anything else reads as `{}`.
fn json_object(body: &Bytes) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn bool_field(body: &Map<String, Value>, key: &str) -> Result<bool, ApiError> {
    body.get(key)
        .and_then(Value::as_bool)
        .ok_or_else(|| ApiError::bad_request(format!("Invalid {} value", key)))
}

fn required_str<'a>(body: &'a Map<String, Value>, key: &str) -> Result<&'a str, ApiError> {
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("Missing required field: {}", key)))
}

fn optional_str<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str)
}

async fn list_records(
    state: &AppState,
    direction: Direction,
    filter: &RecordFilter,
) -> Result<Vec<relay_types::EventRecord>, ApiError> {
    Ok(state
        .events
        .list(direction, filter)
        .await
        .map_err(RelayError::from)?)
}

fn flag_key(flag: ControlFlag) -> &'static str {
    match flag {
        ControlFlag::EventsPublishing => "eventsPublishingEnabled",
        ControlFlag::EventsConsuming => "eventsConsumingEnabled",
    }
}

// --- publisher -------------------------------------------------------------

async fn handle_list_publishing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewPublishingEvents).await?;
    let enabled = state.control.publishing_enabled(&caller.tenant_id).await?;
    let records = list_records(
        &state,
        Direction::Outbox,
        &RecordFilter::tenant(&caller.tenant_id),
    )
    .await?;
    let events: Vec<PublishingEventView> = records.iter().map(PublishingEventView::from).collect();
    Ok(Json(views::event_list(
        flag_key(ControlFlag::EventsPublishing),
        enabled,
        events,
    )))
}

async fn handle_record_publishing(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let caller = authorize(&state, &headers, Permission::ManagePublishingEvents).await?;
    let body = json_object(&body);
    let event_type = required_str(&body, "eventType")?;
    let data = body.get("data").cloned().unwrap_or_else(|| json!({}));

    let mut event = OutboundEvent::new(event_type, data)
        .named(
            optional_str(&body, "eventName").unwrap_or(event_type),
            optional_str(&body, "description").unwrap_or_default(),
        )
        .for_tenant(&caller.tenant_id)
        .created_by(caller.actor());
    if let Some(metadata) = body.get("eventMetadata").filter(|m| !m.is_null()) {
        event = event.with_metadata(metadata.clone());
    }

    let receipt = state.publisher.publish_event(event).await;
    match receipt.record_id.clone() {
        Some(id) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "id": id, "eventId": event_type, "status": EventStatus::Pending })),
        )),
        None => {
            let details = match receipt.outcome().await {
                DeliveryOutcome::NotRecorded { error } => error,
                other => format!("{:?}", other),
            };
            Err(ApiError::internal("Failed to record event", details))
        }
    }
}

async fn handle_toggle_publishing(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PublishingEventView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ManagePublishingEvents).await?;
    let enabled = bool_field(&json_object(&body), "eventPublishingEnabled")?;
    let record = state
        .control
        .set_event_flag(
            &caller.tenant_id,
            Direction::Outbox,
            &id,
            enabled,
            caller.actor(),
        )
        .await?;
    Ok(Json(PublishingEventView::from(&record)))
}

async fn handle_publishing_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LogListView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewPublishingEvents).await?;
    let record = state
        .control
        .find(&caller.tenant_id, Direction::Outbox, &id)
        .await?;
    Ok(Json(LogListView::from(&record)))
}

async fn handle_publishing_log_detail(
    State(state): State<Arc<AppState>>,
    Path((id, log_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<LogEntryView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewPublishingEvents).await?;
    log_detail(&state, &caller, Direction::Outbox, &id, &log_id).await
}

async fn log_detail(
    state: &AppState,
    caller: &Caller,
    direction: Direction,
    id: &str,
    log_id: &str,
) -> Result<Json<LogEntryView>, ApiError> {
    let record = state.control.find(&caller.tenant_id, direction, id).await?;
    if views::log_id(&record) != log_id {
        return Err(RelayError::not_found("Log not found").into());
    }
    Ok(Json(LogEntryView::detail(&record)))
}

async fn handle_redeliver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let caller = authorize(&state, &headers, Permission::ManagePublishingEvents).await?;
    state.publisher.redeliver(&caller.tenant_id, &id).await?;
    tracing::info!(record_id = %id, actor = %caller.actor(), "redelivery requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "id": id,
            "status": EventStatus::Pending,
            "message": "Event queued for redelivery",
        })),
    ))
}

// --- product control -------------------------------------------------------

async fn flag_status(
    state: &AppState,
    headers: &HeaderMap,
    flag: ControlFlag,
) -> Result<Json<Value>, ApiError> {
    let caller = authorize(state, headers, Permission::ViewProductControl).await?;
    let enabled = state.control.flag(&caller.tenant_id, flag).await?;
    let last = state
        .control
        .last_flag_change(&caller.tenant_id, flag)
        .await?
        .map(LastUpdateView::from);
    let key = flag_key(flag);
    Ok(Json(json!({
        key: enabled,
        "lastUpdated": last,
        "status": if enabled { "enabled" } else { "disabled" },
    })))
}

async fn set_flag(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
    flag: ControlFlag,
) -> Result<Json<Value>, ApiError> {
    let caller = authorize(state, headers, Permission::ManageProductControl).await?;
    let key = flag_key(flag);
    let enabled = bool_field(&json_object(body), key)?;
    let entry = state
        .control
        .set_flag(&caller.tenant_id, flag, enabled, caller.actor())
        .await?;
    let noun = match flag {
        ControlFlag::EventsPublishing => "publishing",
        ControlFlag::EventsConsuming => "consuming",
    };
    Ok(Json(json!({
        key: enabled,
        "updatedBy": entry.actor,
        "updatedAt": entry.timestamp,
        "message": format!(
            "Product-level event {} has been {}",
            noun,
            if enabled { "enabled" } else { "disabled" }
        ),
    })))
}

async fn handle_publishing_control(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    flag_status(&state, &headers, ControlFlag::EventsPublishing).await
}

async fn handle_set_publishing_control(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    set_flag(&state, &headers, &body, ControlFlag::EventsPublishing).await
}

async fn handle_consuming_control(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    flag_status(&state, &headers, ControlFlag::EventsConsuming).await
}

async fn handle_set_consuming_control(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    set_flag(&state, &headers, &body, ControlFlag::EventsConsuming).await
}

// --- consumer --------------------------------------------------------------

async fn handle_list_consuming(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewConsumingEvents).await?;
    let enabled = state.control.consuming_enabled(&caller.tenant_id).await?;
    let records = list_records(
        &state,
        Direction::Inbox,
        &RecordFilter::tenant(&caller.tenant_id),
    )
    .await?;
    let events: Vec<ConsumingEventView> = records.iter().map(ConsumingEventView::from).collect();
    Ok(Json(views::event_list(
        flag_key(ControlFlag::EventsConsuming),
        enabled,
        events,
    )))
}

async fn handle_stage_inbound(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let caller = authorize(&state, &headers, Permission::ManageConsumingEvents).await?;
    let body = json_object(&body);
    let envelope = body
        .get("event")
        .filter(|v| v.is_object())
        .cloned()
        .ok_or_else(|| ApiError::bad_request("Missing required field: event"))?;

    let mut inbound = InboundEvent::new(envelope)
        .for_tenant(&caller.tenant_id)
        .created_by(caller.actor());
    if let Some(name) = optional_str(&body, "eventName") {
        inbound = inbound.named(name, optional_str(&body, "description").unwrap_or_default());
    }

    let (status, duplicate, id) = match state.inbox.stage(inbound).await? {
        StageOutcome::Staged(id) => (StatusCode::CREATED, false, id),
        StageOutcome::Duplicate(id) => (StatusCode::OK, true, id),
    };
    Ok((
        status,
        Json(json!({ "id": id, "status": EventStatus::Received, "duplicate": duplicate })),
    ))
}

async fn handle_toggle_consuming(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConsumingEventView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ManageConsumingEvents).await?;
    let enabled = bool_field(&json_object(&body), "eventConsumingEnabled")?;
    let record = state
        .control
        .set_event_flag(
            &caller.tenant_id,
            Direction::Inbox,
            &id,
            enabled,
            caller.actor(),
        )
        .await?;
    Ok(Json(ConsumingEventView::from(&record)))
}

async fn handle_field_mappings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<FieldMappingsView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ManageConsumingEvents).await?;
    let body = json_object(&body);
    let record = state
        .control
        .set_field_mappings(
            &caller.tenant_id,
            &id,
            body.get("fieldMappings"),
            caller.actor(),
        )
        .await?;
    Ok(Json(FieldMappingsView::from(&record)))
}

async fn handle_consuming_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<LogListView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewConsumingEvents).await?;
    let record = state
        .control
        .find(&caller.tenant_id, Direction::Inbox, &id)
        .await?;
    Ok(Json(LogListView::from(&record)))
}

async fn handle_consuming_log_detail(
    State(state): State<Arc<AppState>>,
    Path((id, log_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<LogEntryView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewConsumingEvents).await?;
    log_detail(&state, &caller, Direction::Inbox, &id, &log_id).await
}

async fn handle_mapped_payload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewConsumingEvents).await?;
    let data = state.inbox.mapped_payload(&caller.tenant_id, &id).await?;
    Ok(Json(json!({ "id": id, "data": data })))
}

// --- integration flows -----------------------------------------------------

async fn handle_active_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ActiveEventsView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewIntegrationFlows).await?;
    let filter = RecordFilter {
        enabled: Some(true),
        status: Some(EventStatus::Received),
        ..RecordFilter::tenant(&caller.tenant_id)
    };
    let records = list_records(&state, Direction::Inbox, &filter).await?;
    let active_events: Vec<ActiveEventView> = records.iter().map(ActiveEventView::from).collect();
    Ok(Json(ActiveEventsView {
        total_count: active_events.len(),
        active_events,
        last_updated: chrono::Utc::now(),
    }))
}

async fn handle_flow_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FlowStatusView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ViewIntegrationFlows).await?;
    let record = state.control.locate(&caller.tenant_id, &id).await?;
    Ok(Json(FlowStatusView::new(&record, chrono::Utc::now())))
}

async fn handle_update_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ScheduleUpdatedView>, ApiError> {
    let caller = authorize(&state, &headers, Permission::ManageIntegrationFlows).await?;
    let body = json_object(&body);
    let record = state
        .control
        .set_schedule(
            &caller.tenant_id,
            &id,
            body.get("scheduleConfig"),
            caller.actor(),
        )
        .await?;
    Ok(Json(ScheduleUpdatedView::from(&record)))
}

async fn handle_health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_messages() {
        let msg = |p: &str| routing_error(p).message;
        assert_eq!(msg("/v2/publisher/publishing-events"), "Invalid API version");
        assert_eq!(msg("/"), "Invalid API version");
        assert_eq!(msg("/v1"), "Invalid API path");
        assert_eq!(msg("/v1/billing/invoices"), "Invalid service");
        assert_eq!(msg("/v1/publisher"), "Invalid publisher path");
        assert_eq!(msg("/v1/consumer/queues"), "Invalid consumer endpoint");
        assert_eq!(
            msg("/v1/publisher/publishing-events/abc/logs/x/y"),
            "Invalid publishing events request"
        );
        assert_eq!(
            msg("/v1/integration/flows/abc"),
            "Invalid integration flows request"
        );
        assert_eq!(
            msg("/v1/consumer/product-control"),
            "Invalid product control request"
        );
    }

    #[test]
    fn non_object_bodies_read_as_empty() {
        assert!(json_object(&Bytes::from_static(b"not json")).is_empty());
        assert!(json_object(&Bytes::from_static(b"[1,2]")).is_empty());
        assert_eq!(
            json_object(&Bytes::from_static(br#"{"a":true}"#)).get("a"),
            Some(&json!(true))
        );
    }
}
