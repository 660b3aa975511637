use crate::controller::{owned_connection, ApiResponse};
use crate::extractors::client_identity::ClientIdentity;
use crate::params::realtime::{EventSubscriptionParams, ResourceSubscriptionParams};
use crate::Error;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use service::AppState;
use sse::SubscriptionFilters;

use log::*;

/// POST subscribe a connection to an event type, optionally narrowed by resource filters
#[utoipa::path(
    post,
    path = "/realtime/subscriptions/events",
    request_body = EventSubscriptionParams,
    responses(
        (status = 200, description = "Successfully subscribed to the event type"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Connection not found"),
        (status = 422, description = "Event type is empty or spans several lines")
    )
)]
pub async fn subscribe_event(
    identity: ClientIdentity,
    State(app_state): State<AppState>,
    Json(params): Json<EventSubscriptionParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST Subscribe to event: {params:?}");

    let id = owned_connection(&app_state, &identity, params.connection_id())?;
    let filters: SubscriptionFilters = params.filters.unwrap_or_default().into();
    app_state
        .sse_manager
        .subscribe_with_filters(&id, &params.event_type, &filters)?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK.into(),
        json!({"connection_id": id, "event_type": params.event_type}),
    )))
}

/// DELETE unsubscribe a connection from an event type
#[utoipa::path(
    delete,
    path = "/realtime/subscriptions/events",
    request_body = EventSubscriptionParams,
    responses(
        (status = 200, description = "Successfully unsubscribed from the event type"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Connection not found")
    )
)]
pub async fn unsubscribe_event(
    identity: ClientIdentity,
    State(app_state): State<AppState>,
    Json(params): Json<EventSubscriptionParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("DELETE Unsubscribe from event: {params:?}");

    let id = owned_connection(&app_state, &identity, params.connection_id())?;
    app_state
        .sse_manager
        .unsubscribe_from_event(&id, &params.event_type)?;

    Ok(Json(ApiResponse::<()>::no_content(StatusCode::OK.into())))
}

/// POST subscribe a connection to a single resource
#[utoipa::path(
    post,
    path = "/realtime/subscriptions/resources",
    request_body = ResourceSubscriptionParams,
    responses(
        (status = 200, description = "Successfully subscribed to the resource"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Connection not found")
    )
)]
pub async fn subscribe_resource(
    identity: ClientIdentity,
    State(app_state): State<AppState>,
    Json(params): Json<ResourceSubscriptionParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("POST Subscribe to resource: {params:?}");

    let id = owned_connection(&app_state, &identity, params.connection_id())?;
    app_state
        .sse_manager
        .subscribe_to_resource(&id, &params.resource_type, &params.resource_id)?;

    Ok(Json(ApiResponse::new(
        StatusCode::OK.into(),
        json!({
            "connection_id": id,
            "resource_type": params.resource_type,
            "resource_id": params.resource_id,
        }),
    )))
}

/// DELETE unsubscribe a connection from a single resource
#[utoipa::path(
    delete,
    path = "/realtime/subscriptions/resources",
    request_body = ResourceSubscriptionParams,
    responses(
        (status = 200, description = "Successfully unsubscribed from the resource"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Connection not found")
    )
)]
pub async fn unsubscribe_resource(
    identity: ClientIdentity,
    State(app_state): State<AppState>,
    Json(params): Json<ResourceSubscriptionParams>,
) -> Result<impl IntoResponse, Error> {
    debug!("DELETE Unsubscribe from resource: {params:?}");

    let id = owned_connection(&app_state, &identity, params.connection_id())?;
    app_state.sse_manager.unsubscribe_from_resource(
        &id,
        &params.resource_type,
        &params.resource_id,
    )?;

    Ok(Json(ApiResponse::<()>::no_content(StatusCode::OK.into())))
}
