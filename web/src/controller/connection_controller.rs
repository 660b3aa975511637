use crate::controller::{owned_connection, ApiResponse};
use crate::extractors::client_identity::ClientIdentity;
use crate::Error;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use service::AppState;
use sse::{ConnectionId, ConnectionInfo};

use log::*;

/// GET a caller's own connection with its current subscriptions.
#[utoipa::path(
    get,
    path = "/realtime/connections/{id}",
    params(
        ("id" = String, Path, description = "Connection id returned in the connected event")
    ),
    responses(
        (status = 200, description = "Successfully retrieved the connection", body = ConnectionInfo),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Connection not found")
    )
)]
pub async fn read(
    identity: ClientIdentity,
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    debug!("GET Connection by id: {id}");

    let id = owned_connection(&app_state, &identity, ConnectionId::from(id))?;
    let info = app_state.sse_manager.connection_info(&id)?;

    Ok(Json(ApiResponse::new(StatusCode::OK.into(), info)))
}
