use crate::extractors::client_identity::ClientIdentity;
use crate::params::realtime::StreamParams;
use crate::Error;
use async_stream::stream;
use axum::extract::{Query, State};
use axum::response::sse::Sse;
use futures::Stream;
use log::*;
use service::AppState;
use sse::{ConnectionGuard, ConnectionId, Manager, SseStreamItem};
use tokio::sync::mpsc;

/// GET open a realtime event stream
#[utoipa::path(
    get,
    path = "/realtime/events",
    params(StreamParams),
    responses(
        (status = 200, description = "text/event-stream of realtime events", content_type = "text/event-stream"),
        (status = 401, description = "Unauthorized")
    )
)]
pub(crate) async fn sse_handler(
    identity: ClientIdentity,
    State(app_state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = SseStreamItem>>, Error> {
    debug!("Establishing SSE connection for user {}", identity.user_id);

    let manager = app_state.sse_manager.clone();
    // Bounded: a client that stops reading fills it and is disconnected
    let (tx, mut rx) = mpsc::channel::<SseStreamItem>(manager.settings().stream_buffer.max(1));

    let connection = manager.open_connection(identity.user_id, identity.workspace_id, Box::new(tx))?;
    let token = connection.cancellation_token();
    let guard = ConnectionGuard::new(manager.clone(), connection.id().clone());
    apply_initial_subscriptions(&manager, connection.id(), &params);

    // Frames arrive on the channel; the stream ends when the connection is
    // cancelled. Dropping the stream (client gone) drops the guard, which
    // unregisters the connection.
    let stream = stream! {
        let guard = guard;
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => None,
                item = rx.recv() => item,
            };
            match next {
                Some(item) => yield item,
                None => break,
            }
        }
        debug!("SSE stream {} ended", guard.id());
    };

    // Heartbeats are written by the manager, no axum keep-alive needed
    Ok(Sse::new(stream))
}

fn apply_initial_subscriptions(manager: &Manager, id: &ConnectionId, params: &StreamParams) {
    let filters = params.filters();
    let event_types = params.event_types();

    let result = if event_types.is_empty() {
        filters.resource_refs().iter().try_for_each(|resource| {
            manager.subscribe_to_resource(id, &resource.resource_type, &resource.resource_id)
        })
    } else {
        event_types
            .iter()
            .try_for_each(|event_type| manager.subscribe_with_filters(id, event_type, &filters))
    };

    if let Err(e) = result {
        warn!("Failed to apply initial subscriptions for {id}: {e}");
    }
}
