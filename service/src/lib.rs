use config::{Config, EventBusKind};
use events::{EventBus, LocalBus};
use log::info;
use sse::Manager;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod logging;

/// Error raised while assembling the service from its configuration.
#[derive(Debug)]
pub struct InitError(String);

impl std::fmt::Display for InitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Service initialization failed: {}", self.0)
    }
}

impl std::error::Error for InitError {}

/// The configured event bus plus its background subscriber, if it has one.
pub struct EventBusRuntime {
    pub bus: Arc<dyn EventBus>,
    /// Stops once the shutdown token passed to `init_event_bus` is cancelled.
    pub listener: Option<JoinHandle<()>>,
}

/// Builds the event bus selected by `config.event_bus`.
///
/// For Redis the subscriber task is started here and scoped to `shutdown`.
pub fn init_event_bus(
    config: &Config,
    shutdown: &CancellationToken,
) -> Result<EventBusRuntime, InitError> {
    match config.event_bus {
        EventBusKind::Local => {
            info!("Using in-process event bus");
            Ok(EventBusRuntime {
                bus: Arc::new(LocalBus::new()),
                listener: None,
            })
        }
        EventBusKind::Redis => init_redis_bus(config, shutdown),
    }
}

#[cfg(feature = "redis")]
fn init_redis_bus(
    config: &Config,
    shutdown: &CancellationToken,
) -> Result<EventBusRuntime, InitError> {
    let bus = events::RedisBus::new(config.redis_url())
        .map_err(|e| InitError(e.to_string()))?;
    let listener = bus.spawn_listener(shutdown.clone());
    info!("Using Redis event bus at {}", config.redis_url());
    Ok(EventBusRuntime {
        bus: Arc::new(bus),
        listener: Some(listener),
    })
}

#[cfg(not(feature = "redis"))]
fn init_redis_bus(
    _config: &Config,
    _shutdown: &CancellationToken,
) -> Result<EventBusRuntime, InitError> {
    Err(InitError(
        "event bus \"redis\" requires building with the `redis` feature".to_string(),
    ))
}

// Service-level state shared by every request handler
// Needs to implement Clone to be able to be passed into Router as State
#[derive(Clone)]
pub struct AppState {
    pub sse_manager: Arc<Manager>,
    pub config: Config,
}

impl AppState {
    pub fn new(app_config: Config, sse_manager: &Arc<Manager>) -> Self {
        Self {
            sse_manager: Arc::clone(sse_manager),
            config: app_config,
        }
    }
}
