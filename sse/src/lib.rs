//! Server-Sent Events (SSE) infrastructure for realtime updates.
//!
//! Browser tabs hold long-lived SSE streams, narrow them with subscriptions
//! and receive domain events as soon as they are published on the event bus.
//!
//! # Architecture
//!
//! - **Registry with secondary indices**: O(1) lookups by connection id plus
//!   per-user and per-workspace indices for scoped routing.
//! - **Per-connection filters**: event types and `(resource_type, resource_id)`
//!   pairs. An empty event-type set receives everything.
//! - **Bus fan-in**: scoped broadcasts are published on the `EventBus`; every
//!   process delivers them to the connections it holds.
//! - **Liveness**: heartbeat comments keep proxies from closing idle streams
//!   and refresh `last_seen`; a periodic sweep evicts silent connections.
//!   Client buffers are bounded, so a client that stops reading is closed
//!   once its buffer fills.
//! - **Ephemeral**: events are never stored. A disconnected client misses
//!   them and reloads fresh data on reconnect.
//!
//! # Message Flow
//!
//! 1. Client opens `GET /realtime/events`
//! 2. `Manager::open_connection` sends `retry:` and `connected` frames,
//!    registers it and starts its heartbeat
//! 3. Client narrows interest through the subscription endpoints
//! 4. A backend operation publishes an `events::Event` on the bus
//! 5. `SseEventHandler` hands it to `Manager::deliver`, which writes it to
//!    every in-scope connection whose filters accept it
//! 6. Disconnect, failed write or sweep eviction removes the connection
//!
//! # Example: publishing an event
//!
//! ```rust,ignore
//! use events::{event_types, Event, ResourceChange};
//!
//! let event = Event::resource_change(event_types::KUBERNETES_NODE_POOL_CREATED, change);
//! app_state.sse_manager.broadcast_to_workspace(&workspace_id, event).await?;
//! ```

pub mod connection;
pub mod domain_event_handler;
pub mod error;
pub mod liveness;
pub mod manager;
pub mod message;
pub mod settings;
pub mod subscription;

pub use connection::{Connection, ConnectionId, ConnectionInfo, ConnectionRegistry};
pub use error::Error;
pub use manager::{ConnectionGuard, Delivery, Manager};
pub use message::{validate_event_type, Frame, FrameSink, SseStreamItem};
pub use settings::Settings;
pub use subscription::{SubscriptionFilters, Subscriptions};
