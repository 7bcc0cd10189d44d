//! Session registry: one verification session per active call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::verification::VerificationSession;

/// Shared handle to one call's session. Holding the lock serializes event
/// processing for that call.
pub type SessionHandle = Arc<Mutex<VerificationSession>>;

/// Maps `call_id` to its session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Existing session for a call, if any.
    pub async fn get(&self, call_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(call_id).cloned()
    }

    /// Existing session for a call, creating it on first use.
    pub async fn get_or_create(&self, call_id: &str, now: DateTime<Utc>) -> SessionHandle {
        if let Some(existing) = self.get(call_id).await {
            return existing;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(call_id.to_string())
            .or_insert_with(|| {
                debug!(call_id, "Verification session created");
                Arc::new(Mutex::new(VerificationSession::new(call_id, now)))
            })
            .clone()
    }

    /// Drop a call's session. Returns whether one existed.
    pub async fn end_call(&self, call_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(call_id).is_some();
        if removed {
            info!(call_id, "Call ended, verification session discarded");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions idle for longer than `max_idle`. Sessions busy with an
    /// event are skipped. Returns the number removed.
    pub async fn prune_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => now.signed_duration_since(session.last_activity()) <= max_idle,
            Err(_) => true,
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!(pruned, remaining = sessions.len(), "Pruned idle verification sessions");
        }
        pruned
    }
}

/// Spawn a background task that prunes idle sessions every `interval`.
pub fn spawn_prune_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            registry.prune_idle(Utc::now(), max_idle).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_reuses_sessions() {
        let registry = SessionRegistry::new();
        let now = Utc::now();
        assert!(registry.get("call-1").await.is_none());

        let first = registry.get_or_create("call-1", now).await;
        let second = registry.get_or_create("call-1", now).await;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len().await, 1);

        registry.get_or_create("call-2", now).await;
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn end_call_discards_session() {
        let registry = SessionRegistry::new();
        registry.get_or_create("call-1", Utc::now()).await;
        assert!(registry.end_call("call-1").await);
        assert!(!registry.end_call("call-1").await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn prune_drops_only_idle_sessions() {
        let registry = SessionRegistry::new();
        let start = Utc::now();
        registry.get_or_create("old", start).await;
        registry
            .get_or_create("fresh", start + chrono::Duration::minutes(50))
            .await;

        let now = start + chrono::Duration::minutes(61);
        let pruned = registry.prune_idle(now, Duration::from_secs(3600)).await;
        assert_eq!(pruned, 1);
        assert!(registry.get("old").await.is_none());
        assert!(registry.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn prune_skips_busy_sessions() {
        let registry = SessionRegistry::new();
        let start = Utc::now();
        let handle = registry.get_or_create("busy", start).await;
        let _guard = handle.lock().await;

        let now = start + chrono::Duration::hours(5);
        assert_eq!(registry.prune_idle(now, Duration::from_secs(60)).await, 0);
        assert_eq!(registry.len().await, 1);
    }
}
