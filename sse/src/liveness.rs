//! Heartbeats and the inactive-connection sweep.
//!
//! Every path that ends a connection (heartbeat failure, sweep eviction,
//! explicit removal, client hang-up) goes through `ConnectionRegistry::remove`,
//! which cancels the connection exactly once.

use crate::connection::{Connection, ConnectionRegistry};
use crate::manager::Manager;
use crate::message::Frame;
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Writes a heartbeat comment to `connection` every `period` until the
/// connection is cancelled or a write fails.
pub(crate) fn spawn_heartbeat(
    registry: Arc<ConnectionRegistry>,
    connection: Arc<Connection>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = connection.cancelled() => break,
                _ = ticker.tick() => {
                    if connection.write(Frame::Heartbeat).is_err() {
                        debug!("Heartbeat to {} failed, removing it", connection.id());
                        registry.remove(connection.id());
                        break;
                    }
                    trace!("Heartbeat sent to {}", connection.id());
                }
            }
        }
    })
}

/// Removes every connection whose last successful write is older than
/// `timeout`. Returns the number evicted.
pub fn evict_stale(registry: &ConnectionRegistry, timeout: Duration) -> usize {
    let mut evicted = 0;
    for connection in registry.snapshot() {
        let idle = connection.idle_for();
        if idle <= timeout {
            continue;
        }
        if registry.remove(connection.id()).is_some() {
            info!(
                "Evicted inactive SSE connection {} (idle for {idle:?})",
                connection.id()
            );
            evicted += 1;
        }
    }
    evicted
}

impl Manager {
    /// One sweep pass with the configured client timeout.
    pub fn sweep_inactive(&self) -> usize {
        evict_stale(self.registry(), self.settings().client_timeout)
    }

    /// Runs `sweep_inactive` every cleanup interval until shutdown.
    pub fn start_liveness_monitor(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let shutdown = self.shutdown_token().clone();
        let period = self.settings().cleanup_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("SSE liveness monitor started (every {period:?})");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = manager.sweep_inactive();
                        if evicted > 0 {
                            info!("Liveness sweep evicted {evicted} connection(s), {} remaining", manager.count());
                        }
                    }
                }
            }
            info!("SSE liveness monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::{connection, RecordingSink};
    use crate::settings::Settings;
    use events::LocalBus;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_only_stale_connections_once() {
        let registry = ConnectionRegistry::new();
        let stale = connection("stale", "user-1", None);
        let fresh = connection("fresh", "user-1", None);
        registry.add(stale.clone()).unwrap();
        registry.add(fresh.clone()).unwrap();

        tokio::time::advance(Duration::from_secs(200)).await;
        fresh.touch();
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(evict_stale(&registry, Duration::from_secs(300)), 1);
        assert_eq!(evict_stale(&registry, Duration::from_secs(300)), 0);

        assert!(stale.is_cancelled());
        // The sweep's own removal was the first and only cancel
        assert!(!stale.cancel());
        assert!(!fresh.is_cancelled());
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_refreshes_last_seen() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (sink, frames) = RecordingSink::new();
        let conn = Arc::new(Connection::new(
            "conn-1".into(),
            "user-1".to_string(),
            None,
            Box::new(sink),
            tokio_util::sync::CancellationToken::new(),
        ));
        registry.add(conn.clone()).unwrap();

        let handle = spawn_heartbeat(registry.clone(), conn.clone(), Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(*frames.lock().unwrap(), vec![Frame::Heartbeat, Frame::Heartbeat]);
        assert_eq!(conn.idle_for(), Duration::from_secs(1));

        registry.remove(conn.id());
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_heartbeat_removes_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let conn = Arc::new(Connection::new(
            "conn-1".into(),
            "user-1".to_string(),
            None,
            Box::new(RecordingSink::failing()),
            tokio_util::sync::CancellationToken::new(),
        ));
        registry.add(conn.clone()).unwrap();

        let handle = spawn_heartbeat(registry.clone(), conn.clone(), Duration::from_secs(30));
        handle.await.unwrap();

        assert!(conn.is_cancelled());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_sweeps_and_stops_on_shutdown() {
        let manager = Arc::new(Manager::new(Settings::default(), Arc::new(LocalBus::new())));
        let (sink, _) = RecordingSink::new();
        let conn = manager
            .register_connection("user-1".to_string(), None, Box::new(sink))
            .unwrap();

        let monitor = manager.start_liveness_monitor();
        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(manager.count(), 1);

        tokio::time::sleep(Duration::from_secs(32)).await;
        assert_eq!(manager.count(), 0);
        assert!(conn.is_cancelled());

        manager.shutdown();
        monitor.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reader_is_torn_down() {
        let manager = Arc::new(Manager::new(Settings::default(), Arc::new(LocalBus::new())));
        // Never drained, like a client that stopped reading its response body
        let (tx, _rx) = mpsc::channel::<crate::SseStreamItem>(manager.settings().stream_buffer);
        let conn = manager
            .open_connection("user-1".to_string(), None, Box::new(tx))
            .unwrap();
        let monitor = manager.start_liveness_monitor();

        for _ in 0..40 {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let _ = manager.broadcast_to_all("system-alert", &serde_json::json!({}));
        }

        assert!(conn.is_cancelled());
        assert_eq!(manager.count(), 0);

        manager.shutdown();
        monitor.await.unwrap();
    }
}
