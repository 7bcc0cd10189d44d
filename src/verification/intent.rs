//! Side-effect intents emitted by the state machine.
//!
//! Intents describe work for external collaborators. The machine returns
//! them in order; the gateway dispatches them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::safety::{is_redacted_key, redact_fields};

/// Instructions for the call-control layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CallIntent {
    PauseRecording {
        control_id: String,
    },
    ResumeRecording {
        control_id: String,
        format: String,
        stereo: bool,
    },
    Transfer {
        route: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    Hangup,
}

impl CallIntent {
    /// Short action name for logs.
    pub fn action(&self) -> &'static str {
        match self {
            Self::PauseRecording { .. } => "pause_recording",
            Self::ResumeRecording { .. } => "resume_recording",
            Self::Transfer { .. } => "transfer",
            Self::Hangup => "hangup",
        }
    }
}

/// Security event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    PatientIdentified,
    DobVerified,
    SsnVerificationFailed,
    VerificationSuccess,
    VerificationLocked,
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PatientIdentified => "PATIENT_IDENTIFIED",
            Self::DobVerified => "DOB_VERIFIED",
            Self::SsnVerificationFailed => "SSN_VERIFICATION_FAILED",
            Self::VerificationSuccess => "VERIFICATION_SUCCESS",
            Self::VerificationLocked => "VERIFICATION_LOCKED",
        };
        write!(f, "{s}")
    }
}

/// An audit record for the security event sink.
///
/// There is no field for credential values. Extra details go through
/// [`AuditEvent::with_detail`], which drops redacted keys, and the sink
/// boundary serializes through [`AuditEvent::to_payload`], which filters again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub event_type: SecurityEventType,
    pub call_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    details: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(
        event_type: SecurityEventType,
        call_id: impl Into<String>,
        patient_id: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type,
            call_id: call_id.into(),
            patient_id: patient_id.map(str::to_string),
            occurred_at,
            details: Map::new(),
        }
    }

    /// Attach a non-sensitive detail. Redacted keys are dropped.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        if is_redacted_key(key) {
            tracing::warn!(
                event_type = %self.event_type,
                key,
                "Dropped redacted key from audit event"
            );
            return self;
        }
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    /// Serialized form handed to sinks, with the redaction filter applied.
    pub fn to_payload(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => {
                redact_fields(&mut map);
                Value::Object(map)
            }
            Ok(other) => other,
            Err(e) => {
                tracing::warn!("Failed to serialize audit event: {}", e);
                serde_json::json!({
                    "event_type": self.event_type,
                    "call_id": self.call_id,
                })
            }
        }
    }
}

/// One ordered side effect.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Call(CallIntent),
    Audit(AuditEvent),
}

impl Intent {
    pub fn as_call(&self) -> Option<&CallIntent> {
        match self {
            Self::Call(intent) => Some(intent),
            Self::Audit(_) => None,
        }
    }

    pub fn as_audit(&self) -> Option<&AuditEvent> {
        match self {
            Self::Audit(event) => Some(event),
            Self::Call(_) => None,
        }
    }

    pub(crate) fn map_audit(self, f: impl FnOnce(AuditEvent) -> AuditEvent) -> Self {
        match self {
            Self::Audit(event) => Self::Audit(f(event)),
            other => other,
        }
    }
}
