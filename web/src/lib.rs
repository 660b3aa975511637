//! HTTP surface of the realtime service: the SSE stream endpoint, the
//! subscription endpoints, connection info, health and the OpenAPI docs.

use axum::http::{header, HeaderValue, Method};
use log::*;
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

pub use error::{Error, Result};
pub use service::AppState;

mod controller;
mod error;
mod extractors;
mod params;
pub mod router;
mod sse;

/// Builds the CORS layer from the configured origins. Origins that are not
/// valid header values are skipped with a warning.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {origin:?}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::CACHE_CONTROL,
            header::HeaderName::from_static("x-user-id"),
            header::HeaderName::from_static("x-workspace-id"),
        ])
}

/// Binds the configured interface and serves until `shutdown` resolves.
pub async fn init_server(
    app_state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let address = app_state.config.listen_address();
    let cors = cors_layer(&app_state.config.allowed_origins);

    let listener = TcpListener::bind(&address).await?;
    info!("Server starting... listening for connections on http://{address}");

    let app = router::define_routes(app_state).layer(cors);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
