use crate::connection::{Connection, ConnectionId, ConnectionRegistry, UserId};
use crate::domain_event_handler::SseEventHandler;
use crate::error::Error;
use crate::liveness;
use crate::message::{Frame, FrameSink};
use crate::settings::Settings;
use chrono::Utc;
use events::{event_types, ConnectedPayload, Event, EventBus};
use log::*;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of a direct send to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The connection's subscriptions excluded the event. Not an error.
    Filtered,
}

/// Routes events to local connections and publishes scoped events onto the bus.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
    bus: Arc<dyn EventBus>,
    settings: Settings,
    shutdown: CancellationToken,
}

impl Manager {
    pub fn new(settings: Settings, bus: Arc<dyn EventBus>) -> Self {
        Self::with_shutdown_token(settings, bus, CancellationToken::new())
    }

    /// Uses `shutdown` as the service scope, so tasks started elsewhere (the
    /// bus listener) stop together with this manager.
    pub fn with_shutdown_token(
        settings: Settings,
        bus: Arc<dyn EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            bus,
            settings,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Registers this manager as a handler on its bus so that events
    /// published by any process reach the connections held here.
    pub fn subscribe_to_bus(self: &Arc<Self>) {
        self.bus
            .subscribe(Arc::new(SseEventHandler::new(Arc::downgrade(self))));
    }

    /// Creates a connection writing to `sink` and registers it. Its
    /// cancellation scope is a child of the service shutdown token.
    pub fn register_connection(
        &self,
        user_id: UserId,
        workspace_id: Option<String>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Arc<Connection>, Error> {
        let connection = self.new_connection(user_id, workspace_id, sink);
        self.add(&connection)?;
        Ok(connection)
    }

    /// Full handshake for a new stream: advertise the retry interval, greet
    /// the client with its connection id, register it and start the
    /// heartbeat. The greeting bypasses subscription filters.
    ///
    /// Both handshake frames are written before the connection is visible in
    /// the registry, so no event can overtake the greeting.
    pub fn open_connection(
        &self,
        user_id: UserId,
        workspace_id: Option<String>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Arc<Connection>, Error> {
        let connection = self.new_connection(user_id, workspace_id, sink);

        let greeting = ConnectedPayload {
            connection_id: connection.id().to_string(),
            message: "SSE connection established".to_string(),
            timestamp: Utc::now().timestamp(),
        };
        let handshake = Frame::event(event_types::CONNECTED, &greeting).and_then(|connected| {
            connection.write(Frame::Retry(self.settings.retry_interval))?;
            connection.write(connected)
        });
        if let Err(e) = handshake.and_then(|()| self.add(&connection)) {
            warn!("SSE handshake for {} failed: {e}", connection.id());
            connection.cancel();
            return Err(e);
        }

        liveness::spawn_heartbeat(
            self.registry.clone(),
            connection.clone(),
            self.settings.heartbeat_interval,
        );
        Ok(connection)
    }

    fn new_connection(
        &self,
        user_id: UserId,
        workspace_id: Option<String>,
        sink: Box<dyn FrameSink>,
    ) -> Arc<Connection> {
        Arc::new(Connection::new(
            ConnectionId::generate(&user_id),
            user_id,
            workspace_id,
            sink,
            self.shutdown.child_token(),
        ))
    }

    fn add(&self, connection: &Arc<Connection>) -> Result<(), Error> {
        self.registry.add(Arc::clone(connection))?;
        info!(
            "Registered SSE connection {} for user {} (total: {})",
            connection.id(),
            connection.user_id(),
            self.registry.count()
        );
        Ok(())
    }

    /// Tears down a connection. Calling it for an already removed id is a no-op.
    pub fn remove(&self, id: &ConnectionId) {
        if self.registry.remove(id).is_some() {
            info!(
                "Removed SSE connection {id} (remaining: {})",
                self.registry.count()
            );
        }
    }

    pub fn count(&self) -> usize {
        self.registry.count()
    }

    /// Sends one event to one connection, subject to its event-type filter.
    pub fn send_to_connection<P>(
        &self,
        id: &ConnectionId,
        event_type: &str,
        payload: &P,
    ) -> Result<Delivery, Error>
    where
        P: Serialize + ?Sized,
    {
        let Some(connection) = self.registry.get(id) else {
            warn!("Cannot send {event_type}: connection {id} not found");
            return Err(Error::ConnectionNotFound(id.clone()));
        };

        if !connection.accepts(event_type, &[]) {
            trace!("Connection {id} filtered out {event_type}");
            return Ok(Delivery::Filtered);
        }

        let frame = Frame::event(event_type, payload)?;
        self.write_or_remove(&connection, frame)?;
        Ok(Delivery::Delivered)
    }

    /// Writes to every connection whose filters accept `event_type`. Every
    /// connection is attempted; the last failure, if any, is returned.
    pub fn broadcast_to_all<P>(&self, event_type: &str, payload: &P) -> Result<usize, Error>
    where
        P: Serialize + ?Sized,
    {
        let frame = Frame::event(event_type, payload)?;
        let mut delivered = 0;
        let mut last_error = None;

        for connection in self.registry.snapshot() {
            if connection.is_cancelled() || !connection.accepts(event_type, &[]) {
                continue;
            }
            match self.write_or_remove(&connection, frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => last_error = Some(e),
            }
        }

        match last_error {
            Some(e) => {
                warn!("Broadcast of {event_type} reached {delivered} connection(s), last failure: {e}");
                Err(e)
            }
            None => {
                debug!("Broadcast {event_type} to {delivered} connection(s)");
                Ok(delivered)
            }
        }
    }

    /// Publishes `event` for every connection of `workspace_id`, on any process.
    pub async fn broadcast_to_workspace(&self, workspace_id: &str, event: Event) -> Result<(), Error> {
        self.bus.publish_to_workspace(workspace_id, event).await?;
        Ok(())
    }

    /// Publishes `event` for every connection of `user_id`, on any process.
    pub async fn broadcast_to_user(&self, user_id: &str, event: Event) -> Result<(), Error> {
        self.bus.publish_to_user(user_id, event).await?;
        Ok(())
    }

    /// Delivers a bus event to the matching local connections and returns
    /// how many received it.
    ///
    /// Scope: workspace, then user, then everyone. An event scoped to both a
    /// workspace and a user only reaches that user's connections within the
    /// workspace.
    pub fn deliver(&self, event: &Event) -> usize {
        let targets: Vec<Arc<Connection>> = match (event.workspace_id(), event.user_id()) {
            (Some(workspace_id), Some(user_id)) => self
                .registry
                .snapshot_for_workspace(workspace_id)
                .into_iter()
                .filter(|connection| connection.user_id() == user_id)
                .collect(),
            (Some(workspace_id), None) => self.registry.snapshot_for_workspace(workspace_id),
            (None, Some(user_id)) => self.registry.snapshot_for_user(user_id),
            (None, None) => self.registry.snapshot(),
        };
        if targets.is_empty() {
            return 0;
        }

        let frame = match Frame::event_with_id(event.id(), event.event_type(), event.payload()) {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {} event: {e}", event.event_type());
                return 0;
            }
        };

        let mut delivered = 0;
        for connection in targets {
            if connection.is_cancelled()
                || !connection.accepts(event.event_type(), event.resources())
            {
                continue;
            }
            match self.write_or_remove(&connection, frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Skipping {}: {e}", connection.id()),
            }
        }
        delivered
    }

    /// Cancels the service scope (stopping the sweep and every connection)
    /// and empties the registry. Returns the number of connections closed.
    pub fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let closed = self.registry.drain().len();
        info!("SSE manager shut down, closed {closed} connection(s)");
        closed
    }

    fn write_or_remove(&self, connection: &Connection, frame: Frame) -> Result<(), Error> {
        connection.write(frame).map_err(|e| {
            warn!("Write to {} failed, removing it", connection.id());
            self.remove(connection.id());
            e
        })
    }
}

/// Removes its connection from the manager when dropped. Held by the
/// response stream so that a client hanging up always unregisters.
pub struct ConnectionGuard {
    manager: Arc<Manager>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(manager: Arc<Manager>, id: ConnectionId) -> Self {
        Self { manager, id }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.remove(&self.id);
    }
}
