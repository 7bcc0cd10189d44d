//! Verification state machine.
//!
//! Pure and synchronous: the caller resolves directory lookups first and
//! passes their results in the event, then dispatches the returned intents.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};

use super::intent::{AuditEvent, CallIntent, Intent, SecurityEventType};
use super::session::{CandidatePatient, VerificationSession, VerificationStage};
use crate::config::GatewayConfig;
use crate::directory::PatientRecord;

/// How the caller tried to identify themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyMethod {
    Phone,
    PatientId,
}

/// A verification event with any directory lookup already resolved.
#[derive(Debug)]
pub enum VerificationEvent {
    /// Identification attempt; `record` is the lookup result.
    Identify {
        method: IdentifyMethod,
        record: Option<PatientRecord>,
    },
    /// Caller-supplied date of birth.
    SubmitDob { value: SecretString },
    /// Caller-supplied SSN last-4, already checked against the directory.
    SubmitSsn { matched: bool },
}

/// A verification factor with its own attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    DateOfBirth,
    SsnLast4,
}

impl std::fmt::Display for Factor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DateOfBirth => write!(f, "date_of_birth"),
            Self::SsnLast4 => write!(f, "ssn_last4"),
        }
    }
}

/// What an event did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The session moved forward to `stage`.
    Advanced { stage: VerificationStage },
    /// Lookup miss. Not attempt-counted.
    NotFound,
    /// Wrong value, attempt-counted.
    Mismatch { factor: Factor, remaining: u32 },
    /// Event not valid in the current stage; nothing changed.
    PreconditionViolation,
    /// The session is (or just became) locked.
    LockedOut,
}

/// Result of handling one event.
#[derive(Debug, Clone)]
pub struct Transition {
    pub outcome: Outcome,
    /// Caller-facing reply for speech synthesis.
    pub reply: String,
    /// Ordered side effects for the external collaborators.
    pub intents: Vec<Intent>,
}

impl Transition {
    fn new(outcome: Outcome, reply: impl Into<String>) -> Self {
        Self {
            outcome,
            reply: reply.into(),
            intents: Vec::new(),
        }
    }

    fn with(mut self, intent: Intent) -> Self {
        self.intents.push(intent);
        self
    }

    pub fn call_intents(&self) -> impl Iterator<Item = &CallIntent> {
        self.intents.iter().filter_map(Intent::as_call)
    }

    pub fn audit_events(&self) -> impl Iterator<Item = &AuditEvent> {
        self.intents.iter().filter_map(Intent::as_audit)
    }
}

const LOCKOUT_REPLY: &str = "Too many incorrect attempts. For your security, I can't continue \
     verification on this call. Please call back or visit us in person.";

const LOCKED_REPLY: &str = "Verification is locked for this call. \
     Please call back or visit us in person.";

/// Normalize a spoken/typed date to the canonical separator for comparison.
pub fn normalize_dob(value: &str) -> String {
    value.replace('/', "-").trim().to_string()
}

/// Drives a [`VerificationSession`] through the three verification factors.
pub struct VerificationMachine {
    config: Arc<GatewayConfig>,
}

impl VerificationMachine {
    pub fn new(config: Arc<GatewayConfig>) -> Self {
        Self { config }
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_verification_attempts
    }

    /// Apply one event to a session.
    pub fn handle(
        &self,
        session: &mut VerificationSession,
        event: VerificationEvent,
        now: DateTime<Utc>,
    ) -> Transition {
        session.touch(now);

        if session.is_locked() {
            return self.locked();
        }

        match event {
            VerificationEvent::Identify { method, record } => {
                self.identify(session, method, record, now)
            }
            VerificationEvent::SubmitDob { value } => self.submit_dob(session, &value, now),
            VerificationEvent::SubmitSsn { matched } => self.submit_ssn(session, matched, now),
        }
    }

    /// Reply for any event on a locked session. Only a hangup is re-issued;
    /// the lockout was audited when it happened.
    pub fn locked(&self) -> Transition {
        Transition::new(Outcome::LockedOut, LOCKED_REPLY).with(Intent::Call(CallIntent::Hangup))
    }

    fn identify(
        &self,
        session: &mut VerificationSession,
        method: IdentifyMethod,
        record: Option<PatientRecord>,
        now: DateTime<Utc>,
    ) -> Transition {
        if session.stage() != VerificationStage::Unidentified {
            let reply = if session.is_verified() {
                "You're already verified on this call. How can I help you today?"
            } else {
                "You're already identified on this call. Let's finish verifying your identity."
            };
            return Transition::new(Outcome::PreconditionViolation, reply);
        }

        let Some(record) = record else {
            let reply = match method {
                IdentifyMethod::Phone => {
                    "I don't recognize this phone number. Could you provide your patient ID?"
                }
                IdentifyMethod::PatientId => {
                    "I couldn't find a patient with that ID. Could you double-check it for me?"
                }
            };
            return Transition::new(Outcome::NotFound, reply);
        };

        let candidate = CandidatePatient::from(&record);
        let reply = format!(
            "{}, {}. For security, please verify your date of birth.",
            self.config.greeting_at(now),
            candidate.full_name
        );
        session.identify(candidate);

        info!(call_id = %session.call_id(), method = ?method, "Caller identified");

        Transition::new(
            Outcome::Advanced {
                stage: VerificationStage::DobPending,
            },
            reply,
        )
        .with(self.audit(session, SecurityEventType::PatientIdentified, now))
    }

    fn submit_dob(
        &self,
        session: &mut VerificationSession,
        value: &SecretString,
        now: DateTime<Utc>,
    ) -> Transition {
        match session.stage() {
            VerificationStage::DobPending => {}
            VerificationStage::Unidentified => {
                return Transition::new(
                    Outcome::PreconditionViolation,
                    "Let me first identify your account. What is your patient ID or phone number?",
                );
            }
            _ => {
                return Transition::new(
                    Outcome::PreconditionViolation,
                    "Your date of birth is already verified.",
                );
            }
        }

        let expected = session.candidate().map(CandidatePatient::dob_iso);
        let supplied = normalize_dob(value.expose_secret());

        if expected.as_deref() == Some(supplied.as_str()) {
            session.mark_dob_verified();
            info!(call_id = %session.call_id(), "Date of birth verified");

            return Transition::new(
                Outcome::Advanced {
                    stage: VerificationStage::SsnPending,
                },
                "Thank you. For final verification, please provide the last 4 digits of your \
                 Social Security number. I'm pausing the recording for your privacy.",
            )
            .with(self.audit(session, SecurityEventType::DobVerified, now))
            .with(Intent::Call(CallIntent::PauseRecording {
                control_id: self.config.recording.control_id.clone(),
            }));
        }

        let attempts = session.record_dob_failure();
        if attempts >= self.max_attempts() {
            session.lock();
            warn!(call_id = %session.call_id(), attempts, "Verification locked at date of birth");

            return Transition::new(Outcome::LockedOut, LOCKOUT_REPLY)
                .with(self.audit(session, SecurityEventType::VerificationLocked, now))
                .with(Intent::Call(CallIntent::Hangup));
        }

        let remaining = self.max_attempts() - attempts;
        Transition::new(
            Outcome::Mismatch {
                factor: Factor::DateOfBirth,
                remaining,
            },
            format!(
                "That date of birth doesn't match our records. {}",
                remaining_phrase(remaining)
            ),
        )
    }

    fn submit_ssn(
        &self,
        session: &mut VerificationSession,
        matched: bool,
        now: DateTime<Utc>,
    ) -> Transition {
        if !session.dob_verified() {
            return Transition::new(
                Outcome::PreconditionViolation,
                "Please verify your date of birth first.",
            );
        }
        if session.is_verified() {
            return Transition::new(
                Outcome::PreconditionViolation,
                "You're already verified on this call. How can I help you today?",
            );
        }

        if matched {
            session.mark_verified(now);
            info!(call_id = %session.call_id(), "Caller verified");

            let name = session
                .candidate()
                .map(|c| c.full_name.clone())
                .unwrap_or_default();
            let departments = self
                .config
                .departments
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>();
            let reply = format!(
                "Thank you, {name}. Your identity is verified. Recording has resumed. \
                 How can I help you today? I can help with {}.",
                join_or(&departments)
            );

            return Transition::new(
                Outcome::Advanced {
                    stage: VerificationStage::Verified,
                },
                reply,
            )
            .with(self.audit(session, SecurityEventType::VerificationSuccess, now))
            .with(Intent::Call(self.resume_recording()));
        }

        let attempts = session.record_ssn_failure();
        let failed = self
            .audit(session, SecurityEventType::SsnVerificationFailed, now)
            .map_audit(|event| event.with_detail("attempts", attempts));

        if attempts >= self.max_attempts() {
            session.lock();
            warn!(call_id = %session.call_id(), attempts, "Verification locked at SSN");

            // Recording must not stay paused once the SSN stage is abandoned.
            return Transition::new(Outcome::LockedOut, LOCKOUT_REPLY)
                .with(failed)
                .with(self.audit(session, SecurityEventType::VerificationLocked, now))
                .with(Intent::Call(self.resume_recording()))
                .with(Intent::Call(CallIntent::Hangup));
        }

        let remaining = self.max_attempts() - attempts;
        Transition::new(
            Outcome::Mismatch {
                factor: Factor::SsnLast4,
                remaining,
            },
            format!("That doesn't match. {}", remaining_phrase(remaining)),
        )
        .with(failed)
    }

    fn audit(
        &self,
        session: &VerificationSession,
        event_type: SecurityEventType,
        now: DateTime<Utc>,
    ) -> Intent {
        Intent::Audit(AuditEvent::new(
            event_type,
            session.call_id(),
            session.candidate_patient_id(),
            now,
        ))
    }

    fn resume_recording(&self) -> CallIntent {
        let recording = &self.config.recording;
        CallIntent::ResumeRecording {
            control_id: recording.control_id.clone(),
            format: recording.format.clone(),
            stereo: recording.stereo,
        }
    }
}

fn remaining_phrase(remaining: u32) -> String {
    if remaining == 1 {
        "You have 1 attempt remaining.".to_string()
    } else {
        format!("You have {remaining} attempts remaining.")
    }
}

/// "a", "a or b", "a, b, or c".
fn join_or(items: &[&str]) -> String {
    match items {
        [] => String::new(),
        [one] => one.to_string(),
        [a, b] => format!("{a} or {b}"),
        [rest @ .., last] => format!("{}, or {last}", rest.join(", ")),
    }
}
