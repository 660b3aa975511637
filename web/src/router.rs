use crate::controller::{connection_controller, health_check_controller, subscription_controller};
use crate::{params, sse::handler, AppState};
use axum::{
    routing::{get, post},
    Router,
};

use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

// This is the global definition of our OpenAPI spec. To be a part
// of the rendered spec, a path and schema must be listed here.
#[derive(OpenApi)]
#[openapi(
        info(
            title = "Skyclust Realtime API"
        ),
        paths(
            handler::sse_handler,
            subscription_controller::subscribe_event,
            subscription_controller::unsubscribe_event,
            subscription_controller::subscribe_resource,
            subscription_controller::unsubscribe_resource,
            connection_controller::read,
            health_check_controller::health_check,
        ),
        components(
            schemas(
                params::realtime::EventSubscriptionParams,
                params::realtime::ResourceSubscriptionParams,
                params::realtime::FilterParams,
                sse::ConnectionInfo,
                health_check_controller::HealthStatus,
            )
        ),
        tags(
            (name = "skyclust_realtime", description = "Realtime infrastructure events over Server-Sent Events")
        )
    )]
struct ApiDoc;

pub fn define_routes(app_state: AppState) -> Router {
    Router::new()
        .merge(realtime_routes(app_state.clone()))
        .merge(subscription_routes(app_state.clone()))
        .merge(health_routes(app_state))
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/rapidoc"))
}

fn realtime_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/realtime/events", get(handler::sse_handler))
        .route(
            "/realtime/connections/:id",
            get(connection_controller::read),
        )
        .with_state(app_state)
}

fn subscription_routes(app_state: AppState) -> Router {
    Router::new()
        .route(
            "/realtime/subscriptions/events",
            post(subscription_controller::subscribe_event)
                .delete(subscription_controller::unsubscribe_event),
        )
        .route(
            "/realtime/subscriptions/resources",
            post(subscription_controller::subscribe_resource)
                .delete(subscription_controller::unsubscribe_resource),
        )
        .with_state(app_state)
}

fn health_routes(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check_controller::health_check))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::client_identity::{USER_ID_HEADER, WORKSPACE_ID_HEADER};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use events::LocalBus;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use sse::{Manager, Settings};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn config() -> service::config::Config {
        <service::config::Config as clap::Parser>::parse_from(["realtime"])
    }

    fn app() -> (Router, Arc<Manager>) {
        let manager = Arc::new(Manager::new(Settings::default(), Arc::new(LocalBus::new())));
        let app_state = AppState::new(config(), &manager);
        (define_routes(app_state), manager)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: Method, uri: &str, user_id: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_ID_HEADER, user_id)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn register(manager: &Manager, user_id: &str) -> sse::ConnectionId {
        let (tx, _rx) = tokio::sync::mpsc::channel::<sse::SseStreamItem>(8);
        manager
            .register_connection(user_id.to_string(), None, Box::new(tx))
            .unwrap()
            .id()
            .clone()
    }

    #[tokio::test]
    async fn test_health_reports_connection_count() {
        let (app, manager) = app();
        register(&manager, "user-1");

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"status": "healthy", "connections": 1})
        );
    }

    #[tokio::test]
    async fn test_subscribe_unknown_connection_is_not_found() {
        let (app, _) = app();

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/realtime/subscriptions/events",
                "user-1",
                json!({"connection_id": "user-1-missing", "event_type": "vm-status"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["status_code"], 404);
    }

    #[tokio::test]
    async fn test_subscribe_someone_elses_connection_is_not_found() {
        let (app, manager) = app();
        let id = register(&manager, "owner");

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/realtime/subscriptions/resources",
                "intruder",
                json!({"connection_id": id, "resource_type": "region", "resource_id": "us-east-1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let info = manager.connection_info(&id).unwrap();
        assert!(info.subscribed_resources.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_with_filters_then_read_connection() {
        let (app, manager) = app();
        let id = register(&manager, "user-1");

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/realtime/subscriptions/events",
                "user-1",
                json!({
                    "connection_id": id,
                    "event_type": "kubernetes-node-pool-created",
                    "filters": {"credential_ids": ["cred-123"]}
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/realtime/connections/{id}"))
                    .header(USER_ID_HEADER, "user-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(
            body["data"]["subscribed_event_types"],
            json!(["kubernetes-node-pool-created"])
        );
        assert_eq!(
            body["data"]["subscribed_resources"],
            json!({"credential_id": ["cred-123"]})
        );
    }

    #[tokio::test]
    async fn test_subscribe_to_unsendable_event_type_is_rejected() {
        let (app, manager) = app();
        let id = register(&manager, "user-1");

        let response = app
            .oneshot(json_request(
                Method::POST,
                "/realtime/subscriptions/events",
                "user-1",
                json!({"connection_id": id, "event_type": ""}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json_body(response).await["status_code"], 422);
        assert!(manager
            .connection_info(&id)
            .unwrap()
            .subscribed_event_types
            .is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_resource_is_idempotent() {
        let (app, manager) = app();
        let id = register(&manager, "user-1");
        let body = json!({"connection_id": id, "resource_type": "region", "resource_id": "eu-west-1"});

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(json_request(
                    Method::DELETE,
                    "/realtime/subscriptions/resources",
                    "user-1",
                    body.clone(),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_requests_without_identity_are_unauthorized() {
        let (app, _) = app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/realtime/events")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_event_stream_registers_until_dropped() {
        let (app, manager) = app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/realtime/events?event_types=vm-status&regions=us-east-1")
                    .header(USER_ID_HEADER, "user-1")
                    .header(WORKSPACE_ID_HEADER, "ws-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));
        assert_eq!(manager.count(), 1);

        let connection = manager.registry().snapshot_for_workspace("ws-1").remove(0);
        let info = connection.info();
        assert_eq!(info.subscribed_event_types, vec!["vm-status"]);
        assert_eq!(
            info.subscribed_resources.get("region"),
            Some(&vec!["us-east-1".to_string()])
        );

        drop(response);
        assert_eq!(manager.count(), 0);
        assert!(connection.is_cancelled());
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let (app, _) = app();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let doc = json_body(response).await;
        assert!(doc["paths"]["/realtime/events"].is_object());
    }
}
