use crate::event::Event;
use async_trait::async_trait;
use log::*;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Trait for handling delivered events.
/// Implementations perform side effects like pushing SSE frames. Handlers
/// don't return errors: delivery failures stay inside the handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event);
}

/// Errors raised by an event bus transport.
#[derive(Debug)]
pub enum BusError {
    /// The transport could not be reached or rejected the operation.
    Transport(String),
    /// The event could not be encoded for the wire.
    Serialization(serde_json::Error),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Transport(msg) => write!(f, "Event bus transport error: {msg}"),
            BusError::Serialization(err) => write!(f, "Event serialization error: {err}"),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::Serialization(err) => Some(err),
            BusError::Transport(_) => None,
        }
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::Serialization(err)
    }
}

/// Cross-process pub/sub transport for events.
///
/// Publishing is scoped: an event addressed to a workspace or a user is seen
/// by every process, and each process delivers it to its own connections.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an event with whatever scope it already carries.
    async fn publish(&self, event: Event) -> Result<(), BusError>;

    async fn publish_to_workspace(&self, workspace_id: &str, event: Event) -> Result<(), BusError> {
        self.publish(event.for_workspace(workspace_id)).await
    }

    async fn publish_to_user(&self, user_id: &str, event: Event) -> Result<(), BusError> {
        self.publish(event.for_user(user_id)).await
    }

    /// Register a handler invoked for every event this process receives.
    fn subscribe(&self, handler: Arc<dyn EventHandler>);

    async fn health(&self) -> Result<(), BusError> {
        Ok(())
    }
}

/// Handlers shared between a bus and the task that feeds them.
#[derive(Clone, Default)]
pub(crate) struct HandlerList {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerList {
    pub(crate) fn push(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Calls every handler sequentially in registration order. The list is
    /// copied first so no lock is held across an await point.
    pub(crate) async fn notify(&self, event: &Event) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for handler in handlers.iter() {
            handler.handle(event).await;
        }
    }
}

/// In-process event bus. Every published event is handed to the registered
/// handlers of this process only.
#[derive(Clone, Default)]
pub struct LocalBus {
    handlers: HandlerList,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        trace!("LocalBus publishing event {}", event.event_type());
        self.handlers.notify(&event).await;
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &Event) {
            self.seen.lock().await.push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_publish_to_workspace_scopes_event() {
        let bus = LocalBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(recorder.clone());

        bus.publish_to_workspace("ws-1", Event::new("vm-status", json!({"state": "running"})))
            .await
            .unwrap();

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].workspace_id(), Some("ws-1"));
        assert_eq!(seen[0].user_id(), None);
    }

    #[tokio::test]
    async fn test_publish_to_user_reaches_every_handler_in_order() {
        let bus = LocalBus::new();
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());
        assert_eq!(bus.handler_count(), 2);

        bus.publish_to_user("user-7", Event::new("a", json!(1)))
            .await
            .unwrap();
        bus.publish_to_user("user-7", Event::new("b", json!(2)))
            .await
            .unwrap();

        for recorder in [first, second] {
            let seen = recorder.seen.lock().await;
            let types: Vec<&str> = seen.iter().map(|e| e.event_type()).collect();
            assert_eq!(types, vec!["a", "b"]);
            assert!(seen.iter().all(|e| e.user_id() == Some("user-7")));
        }
    }

    #[tokio::test]
    async fn test_publish_without_handlers_is_ok() {
        let bus = LocalBus::new();
        assert!(bus.publish(Event::new("a", json!(null))).await.is_ok());
        assert!(bus.health().await.is_ok());
    }
}
