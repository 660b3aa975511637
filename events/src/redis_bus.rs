//! Redis pub/sub transport.
//!
//! Events are published as JSON on `realtime:workspace:<id>`,
//! `realtime:user:<id>` or `realtime:broadcast`. Every process runs one
//! listener that pattern-subscribes to `realtime:*` and hands decoded events
//! to its local handlers, so a connection held by any process is reachable.

use crate::bus::{BusError, EventBus, EventHandler, HandlerList};
use crate::event::Event;
use async_trait::async_trait;
use futures_util::StreamExt;
use log::*;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CHANNEL_PREFIX: &str = "realtime";
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        BusError::Transport(err.to_string())
    }
}

#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    handlers: HandlerList,
    /// Publishing connection, opened on first use and shared by every
    /// publish. It reconnects by itself after transport failures.
    publisher: Arc<OnceCell<ConnectionManager>>,
}

impl RedisBus {
    pub fn new(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            handlers: HandlerList::default(),
            publisher: Arc::new(OnceCell::new()),
        })
    }

    /// Channel an event is published on, derived from its scope.
    pub fn channel_for(event: &Event) -> String {
        match (event.workspace_id(), event.user_id()) {
            (Some(workspace_id), _) => format!("{CHANNEL_PREFIX}:workspace:{workspace_id}"),
            (None, Some(user_id)) => format!("{CHANNEL_PREFIX}:user:{user_id}"),
            (None, None) => format!("{CHANNEL_PREFIX}:broadcast"),
        }
    }

    /// Starts the subscriber task. It reconnects after transport failures
    /// and stops once `shutdown` is cancelled.
    pub fn spawn_listener(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let client = self.client.clone();
        let handlers = self.handlers.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = listen(&client, &handlers, &shutdown) => match result {
                        Ok(()) if shutdown.is_cancelled() => break,
                        Ok(()) => warn!("Redis event subscription ended, reconnecting"),
                        Err(e) => error!("Redis event subscription failed: {e}"),
                    },
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                }
            }
            info!("Redis event subscription stopped");
        })
    }

    async fn publisher(&self) -> Result<ConnectionManager, BusError> {
        let connection = self
            .publisher
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(connection.clone())
    }
}

async fn listen(
    client: &redis::Client,
    handlers: &HandlerList,
    shutdown: &CancellationToken,
) -> Result<(), BusError> {
    let mut pubsub = client.get_async_connection().await?.into_pubsub();
    pubsub.psubscribe(format!("{CHANNEL_PREFIX}:*")).await?;
    info!("Subscribed to Redis channels {CHANNEL_PREFIX}:*");

    let mut messages = pubsub.on_message();
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            message = messages.next() => match message {
                Some(message) => message,
                None => return Ok(()),
            },
        };

        let payload: String = match message.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    "Dropping unreadable message on {}: {e}",
                    message.get_channel_name()
                );
                continue;
            }
        };

        match serde_json::from_str::<Event>(&payload) {
            Ok(event) => handlers.notify(&event).await,
            Err(e) => warn!(
                "Dropping undecodable event on {}: {e}",
                message.get_channel_name()
            ),
        }
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        let channel = Self::channel_for(&event);
        let payload = serde_json::to_string(&event)?;

        let mut conn = self.publisher().await?;
        conn.publish::<_, _, ()>(&channel, payload).await?;
        debug!("Published {} ({}) on {channel}", event.event_type(), event.id());
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    async fn health(&self) -> Result<(), BusError> {
        let mut conn = self.publisher().await?;
        redis::cmd("PING").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_prefers_workspace_then_user() {
        let event = Event::new("a", json!({}));
        assert_eq!(RedisBus::channel_for(&event), "realtime:broadcast");

        let event = event.for_user("u-1");
        assert_eq!(RedisBus::channel_for(&event), "realtime:user:u-1");

        let event = event.for_workspace("ws-1");
        assert_eq!(RedisBus::channel_for(&event), "realtime:workspace:ws-1");
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        assert!(RedisBus::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_listener_stops_on_shutdown() {
        // Nothing listens on this port: the task sits in its reconnect loop
        let bus = RedisBus::new("redis://127.0.0.1:1/").unwrap();
        let shutdown = CancellationToken::new();
        let listener = bus.spawn_listener(shutdown.clone());

        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), listener)
            .await
            .expect("listener outlived shutdown")
            .unwrap();
    }
}
