use crate::Manager;
use async_trait::async_trait;
use events::{Event, EventHandler};
use log::*;
use std::sync::Weak;

/// Bridges the event bus to local SSE connections.
///
/// Holds a weak reference: the bus owns its handlers and the manager owns the
/// bus, so a strong one would keep both alive forever.
pub struct SseEventHandler {
    manager: Weak<Manager>,
}

impl SseEventHandler {
    pub fn new(manager: Weak<Manager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl EventHandler for SseEventHandler {
    async fn handle(&self, event: &Event) {
        let Some(manager) = self.manager.upgrade() else {
            trace!("Dropping {} event, SSE manager is gone", event.event_type());
            return;
        };

        let delivered = manager.deliver(event);
        debug!(
            "Delivered {} event to {delivered} local connection(s)",
            event.event_type()
        );
    }
}
