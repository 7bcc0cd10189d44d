//! External collaborator ports: the security event sink and call control.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::DispatchError;
use crate::verification::{AuditEvent, CallIntent};

/// Tracing target for security audit events.
pub const SECURITY_TARGET: &str = "security";

/// Append-only receiver of redacted audit events.
#[async_trait]
pub trait SecurityEventSink: Send + Sync {
    /// Record one event. Implementations receive the event already built
    /// without credentials and must serialize through
    /// [`AuditEvent::to_payload`].
    async fn record(&self, event: &AuditEvent) -> Result<(), DispatchError>;
}

/// Receiver of call-control intents for a call.
#[async_trait]
pub trait CallControlPort: Send + Sync {
    async fn execute(&self, call_id: &str, intent: &CallIntent) -> Result<(), DispatchError>;
}

/// Writes audit events to the `security` tracing target.
#[derive(Debug, Default)]
pub struct TracingSecuritySink;

#[async_trait]
impl SecurityEventSink for TracingSecuritySink {
    async fn record(&self, event: &AuditEvent) -> Result<(), DispatchError> {
        let payload = event.to_payload();
        info!(
            target: SECURITY_TARGET,
            event_type = %event.event_type,
            call_id = %event.call_id,
            payload = %payload,
            "SECURITY: {}",
            event.event_type
        );
        Ok(())
    }
}

/// Logs call-control intents. The webhook transport executes them from the
/// response body, so nothing else happens here.
#[derive(Debug, Default)]
pub struct TracingCallControl;

#[async_trait]
impl CallControlPort for TracingCallControl {
    async fn execute(&self, call_id: &str, intent: &CallIntent) -> Result<(), DispatchError> {
        info!(call_id, action = intent.action(), "Call control intent");
        Ok(())
    }
}

/// Keeps redacted audit payloads in memory.
#[derive(Debug, Default)]
pub struct MemorySecuritySink {
    events: Mutex<Vec<serde_json::Value>>,
}

impl MemorySecuritySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded payload, oldest first.
    pub async fn payloads(&self) -> Vec<serde_json::Value> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl SecurityEventSink for MemorySecuritySink {
    async fn record(&self, event: &AuditEvent) -> Result<(), DispatchError> {
        self.events.lock().await.push(event.to_payload());
        Ok(())
    }
}

/// Keeps executed call-control intents in memory, keyed by call.
#[derive(Debug, Default)]
pub struct MemoryCallControl {
    executed: Mutex<Vec<(String, CallIntent)>>,
    /// Actions that fail instead of executing.
    rejected: Mutex<Vec<&'static str>>,
}

impl MemoryCallControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later intent with this action name fail.
    pub async fn reject(&self, action: &'static str) {
        self.rejected.lock().await.push(action);
    }

    /// Intents executed for one call, in order.
    pub async fn intents_for(&self, call_id: &str) -> Vec<CallIntent> {
        self.executed
            .lock()
            .await
            .iter()
            .filter(|(id, _)| id == call_id)
            .map(|(_, intent)| intent.clone())
            .collect()
    }
}

#[async_trait]
impl CallControlPort for MemoryCallControl {
    async fn execute(&self, call_id: &str, intent: &CallIntent) -> Result<(), DispatchError> {
        if self.rejected.lock().await.contains(&intent.action()) {
            return Err(DispatchError::CallControl {
                call_id: call_id.to_string(),
                action: intent.action().to_string(),
                reason: "action rejected".to_string(),
            });
        }
        self.executed
            .lock()
            .await
            .push((call_id.to_string(), intent.clone()));
        Ok(())
    }
}
