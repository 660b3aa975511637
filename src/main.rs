//! Realtime event service: long-lived SSE streams carrying infrastructure
//! events (cluster, node pool, VPC, VM changes) to dashboard clients.

use log::*;
use service::{config::Config, logging::Logger, AppState};
use sse::Manager;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::new();

    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to start logger: {e}");
        return ExitCode::FAILURE;
    }

    info!("Starting up...");

    // Service scope: cancelling it stops the bus listener, the liveness
    // monitor and every open connection.
    let shutdown = CancellationToken::new();

    let bus_runtime = match service::init_event_bus(&config, &shutdown) {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let sse_manager = Arc::new(Manager::with_shutdown_token(
        config.sse_settings(),
        bus_runtime.bus,
        shutdown,
    ));
    sse_manager.subscribe_to_bus();
    let monitor = sse_manager.start_liveness_monitor();

    let app_state = AppState::new(config, &sse_manager);

    // Open streams only end once their connections are cancelled, so the
    // manager is shut down as soon as the signal arrives.
    let result = web::init_server(app_state, shutdown_signal(Arc::clone(&sse_manager))).await;

    // No-op after a signal; stops the monitor if serving failed early
    sse_manager.shutdown();
    if let Err(e) = monitor.await {
        warn!("Liveness monitor did not stop cleanly: {e}");
    }
    if let Some(listener) = bus_runtime.listener {
        if let Err(e) = listener.await {
            warn!("Event bus listener did not stop cleanly: {e}");
        }
    }

    match result {
        Ok(()) => {
            info!("Server stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Server error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal(sse_manager: Arc<Manager>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");

    let closed = sse_manager.shutdown();
    info!("Closed {closed} SSE connection(s)");
}
