//! Call gateway: wires the directory, state machine, routing gate and the
//! external collaborators together for each inbound call event.
//!
//! Per call, the session lock is held across lookup, transition and dispatch
//! so events for one call are applied strictly in order. Distinct calls run
//! concurrently.

pub mod event;
pub mod ports;
pub mod registry;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::directory::PatientDirectory;
use crate::routing::{DenyReason, RoutingDecision, RoutingGate};
use crate::safety::LeakDetector;
use crate::verification::{
    CallIntent, IdentifyMethod, Intent, Outcome, Transition, VerificationEvent,
    VerificationMachine, VerificationSession, VerificationStage, normalize_dob,
};

pub use event::CallEvent;
pub use ports::{
    CallControlPort, MemoryCallControl, MemorySecuritySink, SECURITY_TARGET, SecurityEventSink,
    TracingCallControl, TracingSecuritySink,
};
pub use registry::{SessionRegistry, spawn_prune_task};

const UNAVAILABLE_REPLY: &str = "I'm having trouble reaching our patient records right now. \
     Please try again in a moment.";

/// Coarse result of one call event, as reported to the voice platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Advanced,
    NotFound,
    Mismatch,
    PreconditionViolation,
    LockedOut,
    Allowed,
    NotVerified,
    UnknownDepartment,
    Informational,
    /// The directory could not answer. Nothing changed.
    Unavailable,
}

impl From<Outcome> for EventOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Advanced { .. } => Self::Advanced,
            Outcome::NotFound => Self::NotFound,
            Outcome::Mismatch { .. } => Self::Mismatch,
            Outcome::PreconditionViolation => Self::PreconditionViolation,
            Outcome::LockedOut => Self::LockedOut,
        }
    }
}

/// Reply to the voice platform for one call event.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayResponse {
    pub reply: String,
    /// Call-control actions, in execution order.
    pub actions: Vec<CallIntent>,
    pub outcome: EventOutcome,
    /// Verification stage after the event, for session-bound events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<VerificationStage>,
}

impl GatewayResponse {
    fn informational(reply: String) -> Self {
        Self {
            reply,
            actions: Vec::new(),
            outcome: EventOutcome::Informational,
            stage: None,
        }
    }
}

/// Entry point for inbound call events.
pub struct CallGateway {
    config: Arc<GatewayConfig>,
    directory: Arc<dyn PatientDirectory>,
    registry: Arc<SessionRegistry>,
    machine: VerificationMachine,
    routing: RoutingGate,
    sink: Arc<dyn SecurityEventSink>,
    call_control: Arc<dyn CallControlPort>,
}

impl CallGateway {
    pub fn new(
        config: Arc<GatewayConfig>,
        directory: Arc<dyn PatientDirectory>,
        sink: Arc<dyn SecurityEventSink>,
        call_control: Arc<dyn CallControlPort>,
    ) -> Self {
        Self {
            machine: VerificationMachine::new(Arc::clone(&config)),
            routing: RoutingGate::new(&config.departments),
            registry: SessionRegistry::new(),
            config,
            directory,
            sink,
            call_control,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn routing(&self) -> &RoutingGate {
        &self.routing
    }

    /// Handle one event for a call at the current time.
    pub async fn handle(&self, call_id: &str, event: CallEvent) -> GatewayResponse {
        self.handle_at(call_id, event, Utc::now()).await
    }

    /// Handle one event for a call at `now`.
    pub async fn handle_at(
        &self,
        call_id: &str,
        event: CallEvent,
        now: DateTime<Utc>,
    ) -> GatewayResponse {
        info!(call_id, tool = event.tool(), "Call event");

        match event {
            CallEvent::ListDepartments => {
                GatewayResponse::informational(self.routing.describe_departments())
            }
            CallEvent::GetInfo => GatewayResponse::informational(self.clinic_info(now)),
            CallEvent::RouteCall { department } => self.route_call(call_id, &department, now).await,
            CallEvent::IdentifyByPhone { phone } => {
                self.identify(call_id, IdentifyMethod::Phone, &phone, now)
                    .await
            }
            CallEvent::IdentifyById { patient_id } => {
                self.identify(call_id, IdentifyMethod::PatientId, &patient_id, now)
                    .await
            }
            CallEvent::VerifyDob { dob } => {
                let scrubber = LeakDetector::new()
                    .watch(dob.expose_secret())
                    .watch(&normalize_dob(dob.expose_secret()));
                let event = VerificationEvent::SubmitDob { value: dob };
                let Some(handle) = self.registry.get(call_id).await else {
                    return self.before_identification(call_id, event, now, &scrubber).await;
                };
                let mut session = handle.lock().await;
                let transition = self.machine.handle(&mut session, event, now);
                self.finish(&session, transition, &scrubber).await
            }
            CallEvent::VerifySsn { ssn_last4 } => {
                let scrubber = LeakDetector::new().watch(ssn_last4.expose_secret());
                let Some(handle) = self.registry.get(call_id).await else {
                    let event = VerificationEvent::SubmitSsn { matched: false };
                    return self.before_identification(call_id, event, now, &scrubber).await;
                };
                let mut session = handle.lock().await;

                let matched = match (session.stage(), session.candidate_patient_id()) {
                    (VerificationStage::SsnPending, Some(patient_id)) => {
                        match self
                            .directory
                            .verify_ssn(patient_id, ssn_last4.expose_secret())
                            .await
                        {
                            Ok(matched) => matched,
                            Err(e) => {
                                warn!(call_id, error = %e, "SSN check failed, directory unavailable");
                                return unavailable(&session);
                            }
                        }
                    }
                    _ => false,
                };

                let transition =
                    self.machine
                        .handle(&mut session, VerificationEvent::SubmitSsn { matched }, now);
                self.finish(&session, transition, &scrubber).await
            }
        }
    }

    /// Factor submitted on a call with no session yet. Sessions start at the
    /// first identification attempt, so this runs against a throwaway session
    /// and registers nothing.
    async fn before_identification(
        &self,
        call_id: &str,
        event: VerificationEvent,
        now: DateTime<Utc>,
        scrubber: &LeakDetector,
    ) -> GatewayResponse {
        let mut transient = VerificationSession::new(call_id, now);
        let transition = self.machine.handle(&mut transient, event, now);
        self.finish(&transient, transition, scrubber).await
    }

    /// Discard a call's session once the call ends.
    pub async fn end_call(&self, call_id: &str) -> bool {
        self.registry.end_call(call_id).await
    }

    async fn identify(
        &self,
        call_id: &str,
        method: IdentifyMethod,
        key: &str,
        now: DateTime<Utc>,
    ) -> GatewayResponse {
        let handle = self.registry.get_or_create(call_id, now).await;
        let mut session = handle.lock().await;

        // Only an unidentified session can use a lookup result.
        let record = if session.stage() == VerificationStage::Unidentified {
            let lookup = match method {
                IdentifyMethod::Phone => self.directory.lookup_by_phone(key).await,
                IdentifyMethod::PatientId => self.directory.lookup_by_id(key).await,
            };
            match lookup {
                Ok(record) => record,
                Err(e) => {
                    warn!(call_id, error = %e, "Patient lookup failed, directory unavailable");
                    return unavailable(&session);
                }
            }
        } else {
            None
        };

        let transition = self
            .machine
            .handle(&mut session, VerificationEvent::Identify { method, record }, now);
        self.finish(&session, transition, &LeakDetector::new()).await
    }

    async fn route_call(
        &self,
        call_id: &str,
        department: &str,
        now: DateTime<Utc>,
    ) -> GatewayResponse {
        // Unknown calls are routed against a throwaway unverified session.
        let handle = match self.registry.get(call_id).await {
            Some(handle) => handle,
            None => {
                let decision = self
                    .routing
                    .authorize_transfer(&VerificationSession::new(call_id, now), department);
                return GatewayResponse {
                    reply: decision.reply(),
                    actions: Vec::new(),
                    outcome: decision_outcome(&decision),
                    stage: Some(VerificationStage::Unidentified),
                };
            }
        };
        let session = handle.lock().await;

        if session.is_locked() {
            let transition = self.machine.locked();
            return self.finish(&session, transition, &LeakDetector::new()).await;
        }

        let decision = self.routing.authorize_transfer(&session, department);
        let actions: Vec<CallIntent> = decision.intent().into_iter().collect();
        for action in &actions {
            self.execute(call_id, action).await;
        }
        GatewayResponse {
            reply: decision.reply(),
            actions,
            outcome: decision_outcome(&decision),
            stage: Some(session.stage()),
        }
    }

    /// Dispatch a transition's intents in order and build the response.
    async fn finish(
        &self,
        session: &VerificationSession,
        transition: Transition,
        scrubber: &LeakDetector,
    ) -> GatewayResponse {
        let mut actions = Vec::new();
        for intent in transition.intents {
            match intent {
                Intent::Call(action) => {
                    self.execute(session.call_id(), &action).await;
                    actions.push(action);
                }
                Intent::Audit(event) => {
                    if let Err(e) = self.sink.record(&event).await {
                        warn!(
                            call_id = %session.call_id(),
                            event_type = %event.event_type,
                            error = %e,
                            "Failed to record security event"
                        );
                    }
                }
            }
        }

        GatewayResponse {
            reply: scrubber.scrub(&transition.reply),
            actions,
            outcome: transition.outcome.into(),
            stage: Some(session.stage()),
        }
    }

    async fn execute(&self, call_id: &str, action: &CallIntent) {
        if let Err(e) = self.call_control.execute(call_id, action).await {
            warn!(call_id, action = action.action(), error = %e, "Call control failed");
        }
    }

    fn clinic_info(&self, now: DateTime<Utc>) -> String {
        let status = if self.config.is_open_at(now) {
            "We're open right now."
        } else {
            "We're currently closed."
        };
        format!(
            "{} is open Monday through Friday, {}. {status} \
             For emergencies, please hang up and call 911.",
            self.config.clinic_name,
            self.config.business_hours()
        )
    }
}

fn unavailable(session: &VerificationSession) -> GatewayResponse {
    GatewayResponse {
        reply: UNAVAILABLE_REPLY.to_string(),
        actions: Vec::new(),
        outcome: EventOutcome::Unavailable,
        stage: Some(session.stage()),
    }
}

fn decision_outcome(decision: &RoutingDecision) -> EventOutcome {
    match decision {
        RoutingDecision::Allow(_) => EventOutcome::Allowed,
        RoutingDecision::Deny(DenyReason::NotVerified) => EventOutcome::NotVerified,
        RoutingDecision::Deny(DenyReason::UnknownDepartment { .. }) => {
            EventOutcome::UnknownDepartment
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::TimeZone;
    use secrecy::SecretString;

    use super::*;
    use crate::directory::{InMemoryDirectory, PatientRecord};
    use crate::error::{DirectoryError, DispatchError};
    use crate::verification::AuditEvent;

    struct Harness {
        gateway: CallGateway,
        sink: Arc<MemorySecuritySink>,
        control: Arc<MemoryCallControl>,
    }

    fn harness_with(directory: Arc<dyn PatientDirectory>) -> Harness {
        let sink = Arc::new(MemorySecuritySink::new());
        let control = Arc::new(MemoryCallControl::new());
        let gateway = CallGateway::new(
            Arc::new(GatewayConfig::default()),
            directory,
            sink.clone(),
            control.clone(),
        );
        Harness {
            gateway,
            sink,
            control,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryDirectory::demo().unwrap()))
    }

    fn morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn phone(number: &str) -> CallEvent {
        CallEvent::IdentifyByPhone {
            phone: number.to_string(),
        }
    }

    fn dob(value: &str) -> CallEvent {
        CallEvent::VerifyDob {
            dob: SecretString::from(value.to_string()),
        }
    }

    fn ssn(value: &str) -> CallEvent {
        CallEvent::VerifySsn {
            ssn_last4: SecretString::from(value.to_string()),
        }
    }

    fn route(department: &str) -> CallEvent {
        CallEvent::RouteCall {
            department: department.to_string(),
        }
    }

    #[tokio::test]
    async fn full_verification_then_transfer() {
        let h = harness();
        let now = morning();

        let r = h.gateway.handle_at("c1", phone("+15551234567"), now).await;
        assert_eq!(r.reply, "Good morning, John Smith. For security, please verify your date of birth.");
        assert_eq!(r.stage, Some(VerificationStage::DobPending));

        let r = h.gateway.handle_at("c1", dob("1985/03/15"), now).await;
        assert_eq!(r.outcome, EventOutcome::Advanced);
        assert_eq!(
            r.actions,
            [CallIntent::PauseRecording {
                control_id: "main".to_string()
            }]
        );

        let r = h.gateway.handle_at("c1", ssn("1234"), now).await;
        assert_eq!(r.stage, Some(VerificationStage::Verified));
        assert!(matches!(r.actions[0], CallIntent::ResumeRecording { .. }));

        let r = h.gateway.handle_at("c1", route("Billing"), now).await;
        assert_eq!(r.outcome, EventOutcome::Allowed);
        assert_eq!(r.reply, "Connecting you to billing.");

        let executed = h.control.intents_for("c1").await;
        assert_eq!(executed.len(), 3);
        assert_eq!(
            executed[2],
            CallIntent::Transfer {
                route: "/billing".to_string(),
                is_final: true
            }
        );

        let types: Vec<_> = h
            .sink
            .payloads()
            .await
            .iter()
            .map(|p| p["event_type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(types, ["PATIENT_IDENTIFIED", "DOB_VERIFIED", "VERIFICATION_SUCCESS"]);
    }

    #[tokio::test]
    async fn transfer_before_verification_is_denied() {
        let h = harness();
        let r = h.gateway.handle_at("c2", route("billing"), morning()).await;
        assert_eq!(r.outcome, EventOutcome::NotVerified);
        assert!(r.actions.is_empty());

        h.gateway.handle_at("c2", phone("+15551234567"), morning()).await;
        let r = h.gateway.handle_at("c2", route("nonexistent"), morning()).await;
        assert_eq!(r.reply, "I need to verify your identity first.");
        assert!(h.control.intents_for("c2").await.is_empty());
    }

    #[tokio::test]
    async fn ssn_lockout_resumes_recording_and_hangs_up() {
        let h = harness();
        let now = morning();
        h.gateway.handle_at("c3", phone("+15551234567"), now).await;
        h.gateway.handle_at("c3", dob("1985-03-15"), now).await;
        h.gateway.handle_at("c3", ssn("0000"), now).await;
        h.gateway.handle_at("c3", ssn("1111"), now).await;
        let r = h.gateway.handle_at("c3", ssn("2222"), now).await;

        assert_eq!(r.outcome, EventOutcome::LockedOut);
        assert_eq!(r.stage, Some(VerificationStage::Locked));
        assert!(matches!(r.actions[0], CallIntent::ResumeRecording { .. }));
        assert_eq!(r.actions[1], CallIntent::Hangup);

        let audits_before = h.sink.payloads().await.len();
        let r = h.gateway.handle_at("c3", ssn("1234"), now).await;
        assert_eq!(r.actions, [CallIntent::Hangup]);
        let r = h.gateway.handle_at("c3", route("billing"), now).await;
        assert_eq!(r.outcome, EventOutcome::LockedOut);
        assert_eq!(h.sink.payloads().await.len(), audits_before);

        for payload in h.sink.payloads().await {
            let text = payload.to_string();
            for secret in ["0000", "1111", "2222", "1985-03-15"] {
                assert!(!text.contains(secret), "{text} leaks {secret}");
            }
        }
    }

    #[tokio::test]
    async fn ssn_before_dob_never_consults_directory() {
        let h = harness();
        h.gateway.handle_at("c4", phone("+15551234567"), morning()).await;
        let r = h.gateway.handle_at("c4", ssn("1234"), morning()).await;
        assert_eq!(r.outcome, EventOutcome::PreconditionViolation);
        assert_eq!(r.reply, "Please verify your date of birth first.");
        assert_eq!(r.stage, Some(VerificationStage::DobPending));
    }

    #[tokio::test]
    async fn public_tools_need_no_session() {
        let h = harness();
        let r = h.gateway.handle_at("c5", CallEvent::ListDepartments, morning()).await;
        assert_eq!(r.outcome, EventOutcome::Informational);
        assert!(r.reply.contains("appointments"));

        let r = h.gateway.handle_at("c5", CallEvent::GetInfo, morning()).await;
        assert!(r.reply.starts_with("HealthFirst Medical is open Monday through Friday, 8 AM to 6 PM."));
        assert!(r.reply.contains("We're open right now."));
        assert!(r.stage.is_none());
        assert!(h.gateway.registry().is_empty().await);
    }

    #[tokio::test]
    async fn end_call_discards_progress() {
        let h = harness();
        h.gateway.handle_at("c6", phone("+15551234567"), morning()).await;
        assert!(h.gateway.end_call("c6").await);

        let r = h.gateway.handle_at("c6", dob("1985-03-15"), morning()).await;
        assert_eq!(r.outcome, EventOutcome::PreconditionViolation);
        assert_eq!(r.stage, Some(VerificationStage::Unidentified));
        assert!(h.gateway.registry().is_empty().await);
    }

    struct DownDirectory;

    #[async_trait]
    impl PatientDirectory for DownDirectory {
        async fn lookup_by_phone(&self, _: &str) -> Result<Option<PatientRecord>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection refused".to_string()))
        }

        async fn lookup_by_id(&self, _: &str) -> Result<Option<PatientRecord>, DirectoryError> {
            Err(DirectoryError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn directory_outage_changes_nothing() {
        let h = harness_with(Arc::new(DownDirectory));
        let r = h.gateway.handle_at("c7", phone("+15551234567"), morning()).await;
        assert_eq!(r.outcome, EventOutcome::Unavailable);
        assert_eq!(r.stage, Some(VerificationStage::Unidentified));
        assert!(h.sink.payloads().await.is_empty());
    }

    struct FailingSink;

    #[async_trait]
    impl SecurityEventSink for FailingSink {
        async fn record(&self, event: &AuditEvent) -> Result<(), DispatchError> {
            Err(DispatchError::Sink {
                event_type: event.event_type.to_string(),
                reason: "disk full".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn sink_failure_does_not_block_verification() {
        let gateway = CallGateway::new(
            Arc::new(GatewayConfig::default()),
            Arc::new(InMemoryDirectory::demo().unwrap()),
            Arc::new(FailingSink),
            Arc::new(TracingCallControl),
        );
        let r = gateway.handle_at("c8", phone("+15559876543"), morning()).await;
        assert_eq!(r.outcome, EventOutcome::Advanced);
        assert!(r.reply.contains("Jane Doe"));
    }

    #[tokio::test]
    async fn call_control_failure_keeps_verification_progress() {
        let h = harness();
        h.control.reject("pause_recording").await;
        h.gateway.handle_at("c11", phone("+15551234567"), morning()).await;

        let r = h.gateway.handle_at("c11", dob("1985-03-15"), morning()).await;
        assert_eq!(r.stage, Some(VerificationStage::SsnPending));
        assert_eq!(
            r.actions,
            [CallIntent::PauseRecording {
                control_id: "main".to_string()
            }]
        );
        assert!(h.control.intents_for("c11").await.is_empty());
        assert_eq!(h.sink.payloads().await.len(), 2);
    }

    #[tokio::test]
    async fn factors_before_identification_register_no_session() {
        let h = harness();
        for n in 0..20 {
            let call_id = format!("early-{n}");
            let r = h.gateway.handle_at(&call_id, dob("1985-03-15"), morning()).await;
            assert_eq!(r.outcome, EventOutcome::PreconditionViolation);
            assert_eq!(r.stage, Some(VerificationStage::Unidentified));

            let r = h.gateway.handle_at(&call_id, ssn("1234"), morning()).await;
            assert_eq!(r.outcome, EventOutcome::PreconditionViolation);
            assert!(r.actions.is_empty());
        }
        assert!(h.gateway.registry().is_empty().await);
        assert!(h.sink.payloads().await.is_empty());
    }

    #[tokio::test]
    async fn wordy_dob_input_leaves_reply_intact() {
        let h = harness();
        h.gateway.handle_at("c9", phone("+15551234567"), morning()).await;

        let r = h.gateway.handle_at("c9", dob("match"), morning()).await;
        assert_eq!(
            r.reply,
            "That date of birth doesn't match our records. You have 2 attempts remaining."
        );
        let r = h.gateway.handle_at("c9", dob("You have"), morning()).await;
        assert_eq!(
            r.reply,
            "That date of birth doesn't match our records. You have 1 attempt remaining."
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_wrong_dobs_on_one_call_lock_exactly_once() {
        let h = harness();
        let gateway = Arc::new(h.gateway);
        gateway.handle_at("c10", phone("+15551234567"), morning()).await;

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..10 {
            let gateway = Arc::clone(&gateway);
            tasks.spawn(async move {
                let wrong = format!("1970-01-{:02}", n + 1);
                gateway.handle_at("c10", dob(&wrong), morning()).await
            });
        }
        let mut hangups = 0;
        while let Some(joined) = tasks.join_next().await {
            let r = joined.unwrap();
            assert!(r.outcome == EventOutcome::Mismatch || r.outcome == EventOutcome::LockedOut);
            hangups += r.actions.iter().filter(|a| **a == CallIntent::Hangup).count();
        }
        assert_eq!(hangups, 8);

        let handle = gateway.registry().get("c10").await.unwrap();
        let session = handle.lock().await;
        assert!(session.is_locked());
        assert_eq!(session.dob_attempts(), 3);

        let types: Vec<_> = h
            .sink
            .payloads()
            .await
            .iter()
            .map(|p| p["event_type"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(types, ["PATIENT_IDENTIFIED", "VERIFICATION_LOCKED"]);
    }
}
