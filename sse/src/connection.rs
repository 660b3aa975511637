use crate::error::Error;
use crate::message::{Frame, FrameSink};
use crate::subscription::Subscriptions;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use events::ResourceRef;
use log::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use utoipa::ToSchema;

// Type alias for user IDs (identity comes from the auth layer as a string)
pub type UserId = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// `{user_id}-{uuid}`: readable in logs, unique per stream.
    pub fn generate(user_id: &str) -> Self {
        Self(format!("{}-{}", user_id, uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutable per-connection state, guarded by the connection's own lock.
#[derive(Debug)]
struct ConnectionState {
    /// Monotonic, so wall-clock jumps can't age every connection at once.
    last_seen: Instant,
    subscriptions: Subscriptions,
}

/// One open SSE stream.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    workspace_id: Option<String>,
    created_at: DateTime<Utc>,
    sink: Box<dyn FrameSink>,
    cancel: CancellationToken,
    cancelled: AtomicBool,
    state: RwLock<ConnectionState>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        user_id: UserId,
        workspace_id: Option<String>,
        sink: Box<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            user_id,
            workspace_id,
            created_at: Utc::now(),
            sink,
            cancel,
            cancelled: AtomicBool::new(false),
            state: RwLock::new(ConnectionState {
                last_seen: Instant::now(),
                subscriptions: Subscriptions::default(),
            }),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.workspace_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_seen(&self) -> Instant {
        self.read_state().last_seen
    }

    /// Time since the last successful write.
    pub fn idle_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_seen())
    }

    /// Records a successful write. Never moves `last_seen` backwards.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut state = self.write_state();
        state.last_seen = state.last_seen.max(now);
    }

    /// Writes a frame to the client and refreshes `last_seen` on success.
    /// The state lock is not held while the sink is written.
    pub fn write(&self, frame: Frame) -> Result<(), Error> {
        self.sink
            .send(frame)
            .map_err(|_| Error::ConnectionClosed(self.id.clone()))?;
        self.touch();
        Ok(())
    }

    /// Whether an event of `event_type` tagged with `resources` passes this
    /// connection's filters.
    pub fn accepts(&self, event_type: &str, resources: &[ResourceRef]) -> bool {
        self.read_state().subscriptions.accepts(event_type, resources)
    }

    /// Applies `update` to the filter state under the connection's lock.
    pub fn update_subscriptions<R>(&self, update: impl FnOnce(&mut Subscriptions) -> R) -> R {
        update(&mut self.write_state().subscriptions)
    }

    /// Triggers the connection's cancellation scope. Returns `true` only for
    /// the call that actually cancelled it.
    pub fn cancel(&self) -> bool {
        let first = !self.cancelled.swap(true, Ordering::SeqCst);
        if first {
            self.cancel.cancel();
        }
        first
    }

    /// True once cancelled directly or through the service shutdown token.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn info(&self) -> ConnectionInfo {
        let state = self.read_state();
        let now = Utc::now();
        let last_seen = chrono::Duration::from_std(state.last_seen.elapsed())
            .ok()
            .and_then(|idle| now.checked_sub_signed(idle))
            .unwrap_or(now);
        ConnectionInfo {
            connection_id: self.id.clone(),
            user_id: self.user_id.clone(),
            workspace_id: self.workspace_id.clone(),
            created_at: self.created_at,
            last_seen,
            subscribed_event_types: state.subscriptions.event_types(),
            subscribed_resources: state.subscriptions.resources(),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConnectionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConnectionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("workspace_id", &self.workspace_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Point-in-time view of a connection, returned by the info endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ConnectionInfo {
    #[schema(value_type = String)]
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Empty means the connection receives every event type.
    pub subscribed_event_types: Vec<String>,
    pub subscribed_resources: BTreeMap<String, Vec<String>>,
}

/// Connection registry with secondary indices for O(1) scoped lookups.
///
/// Iteration always works on a snapshot: no map lock is held while a caller
/// writes to a client.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, Arc<Connection>>,

    /// Secondary index: connections per user for user-scoped delivery
    user_index: DashMap<UserId, HashSet<ConnectionId>>,

    /// Secondary index: connections per workspace for workspace-scoped delivery
    workspace_index: DashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            user_index: DashMap::new(),
            workspace_index: DashMap::new(),
        }
    }

    /// Register a connection - O(1). Rejects an id that is already present.
    pub fn add(&self, connection: Arc<Connection>) -> Result<(), Error> {
        match self.connections.entry(connection.id().clone()) {
            Entry::Occupied(entry) => {
                error!("Refusing to register duplicate connection {}", entry.key());
                Err(Error::DuplicateConnection(entry.key().clone()))
            }
            Entry::Vacant(entry) => {
                // Indices are filled while the primary shard is held so a
                // concurrent remove can't leave a dangling index entry.
                self.user_index
                    .entry(connection.user_id().to_string())
                    .or_default()
                    .insert(connection.id().clone());
                if let Some(workspace_id) = connection.workspace_id() {
                    self.workspace_index
                        .entry(workspace_id.to_string())
                        .or_default()
                        .insert(connection.id().clone());
                }
                entry.insert(connection);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Unregister a connection - O(1). Cancels it as part of removal.
    /// Returns `None` if it was already gone.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(id)?;

        Self::unindex(&self.user_index, connection.user_id(), id);
        if let Some(workspace_id) = connection.workspace_id() {
            Self::unindex(&self.workspace_index, workspace_id, id);
        }

        connection.cancel();
        Some(connection)
    }

    pub fn count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn snapshot_for_user(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.snapshot_indexed(&self.user_index, user_id)
    }

    pub fn snapshot_for_workspace(&self, workspace_id: &str) -> Vec<Arc<Connection>> {
        self.snapshot_indexed(&self.workspace_index, workspace_id)
    }

    /// Removes every connection, cancelling each one.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.iter().filter_map(|id| self.remove(id)).collect()
    }

    fn snapshot_indexed(
        &self,
        index: &DashMap<String, HashSet<ConnectionId>>,
        key: &str,
    ) -> Vec<Arc<Connection>> {
        let ids: Vec<ConnectionId> = match index.get(key) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };
        ids.iter().filter_map(|id| self.get(id)).collect()
    }

    fn unindex(index: &DashMap<String, HashSet<ConnectionId>>, key: &str, id: &ConnectionId) {
        if let Some(mut ids) = index.get_mut(key) {
            ids.remove(id);
        }
        // Clean up empty entries without racing a concurrent insert
        index.remove_if(key, |_, ids| ids.is_empty());
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_generated_ids_are_unique_and_prefixed_with_user() {
        let a = ConnectionId::generate("user-1");
        let b = ConnectionId::generate("user-1");

        assert_ne!(a, b);
        assert!(a.as_str().starts_with("user-1-"));
    }

    #[test]
    fn test_count_tracks_adds_minus_removes() {
        let registry = ConnectionRegistry::new();
        let ids: Vec<String> = (0..5).map(|i| format!("conn-{i}")).collect();

        for (added, id) in ids.iter().enumerate() {
            registry.add(connection(id, "user-1", None)).unwrap();
            assert_eq!(registry.count(), added + 1);
        }

        registry.remove(&ConnectionId::from("conn-0"));
        registry.remove(&ConnectionId::from("conn-3"));
        assert_eq!(registry.count(), 3);

        registry.remove(&ConnectionId::from("conn-3"));
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let registry = ConnectionRegistry::new();
        registry.add(connection("conn-1", "user-1", None)).unwrap();

        let result = registry.add(connection("conn-1", "user-2", None));

        assert!(matches!(result, Err(Error::DuplicateConnection(_))));
        assert_eq!(registry.count(), 1);
        assert_eq!(
            registry.get(&ConnectionId::from("conn-1")).unwrap().user_id(),
            "user-1"
        );
    }

    #[test]
    fn test_remove_twice_cancels_once() {
        let registry = ConnectionRegistry::new();
        let conn = connection("conn-1", "user-1", Some("ws-1"));
        registry.add(conn.clone()).unwrap();

        let removed = registry.remove(conn.id());
        assert!(removed.is_some());
        assert!(conn.is_cancelled());
        // A later cancel is not the first one
        assert!(!conn.cancel());

        assert!(registry.remove(conn.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_secondary_indices_follow_membership() {
        let registry = ConnectionRegistry::new();
        registry.add(connection("a", "user-1", Some("ws-1"))).unwrap();
        registry.add(connection("b", "user-1", Some("ws-2"))).unwrap();
        registry.add(connection("c", "user-2", Some("ws-1"))).unwrap();

        assert_eq!(registry.snapshot_for_user("user-1").len(), 2);
        assert_eq!(registry.snapshot_for_workspace("ws-1").len(), 2);
        assert!(registry.snapshot_for_user("nobody").is_empty());

        registry.remove(&ConnectionId::from("a"));
        registry.remove(&ConnectionId::from("c"));

        let user_1: Vec<String> = registry
            .snapshot_for_user("user-1")
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(user_1, vec!["b".to_string()]);
        assert!(registry.snapshot_for_workspace("ws-1").is_empty());
        assert!(registry.workspace_index.get("ws-1").is_none());
        assert!(registry.user_index.get("user-2").is_none());
    }

    #[test]
    fn test_drain_removes_and_cancels_everything() {
        let registry = ConnectionRegistry::new();
        let conns: Vec<_> = (0..3)
            .map(|i| connection(&format!("conn-{i}"), "user-1", None))
            .collect();
        for conn in &conns {
            registry.add(conn.clone()).unwrap();
        }

        assert_eq!(registry.drain().len(), 3);
        assert!(registry.is_empty());
        assert!(conns.iter().all(|c| c.is_cancelled()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_write_resets_idle_time() {
        let conn = connection("conn-1", "user-1", None);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(conn.idle_for(), Duration::from_secs(90));

        conn.write(Frame::Heartbeat).unwrap();
        assert_eq!(conn.idle_for(), Duration::ZERO);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(conn.idle_for(), Duration::from_secs(5));
    }

    #[test]
    fn test_failed_write_reports_closed_connection() {
        let conn = Connection::new(
            ConnectionId::from("conn-1"),
            "user-1".to_string(),
            None,
            Box::new(RecordingSink::failing()),
            CancellationToken::new(),
        );
        let before = conn.last_seen();

        let result = conn.write(Frame::Heartbeat);

        assert!(matches!(result, Err(Error::ConnectionClosed(_))));
        assert_eq!(conn.last_seen(), before);
    }
}
