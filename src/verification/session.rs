//! Per-call verification session.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::directory::PatientRecord;

/// Stages of caller verification.
///
/// Progresses linearly: Unidentified → DobPending → SsnPending → Verified.
/// Either pending stage may terminate at Locked instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStage {
    #[default]
    Unidentified,
    DobPending,
    SsnPending,
    Verified,
    Locked,
}

impl VerificationStage {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: VerificationStage) -> bool {
        use VerificationStage::*;
        matches!(
            (self, target),
            (Unidentified, DobPending)
                | (DobPending, SsnPending)
                | (SsnPending, Verified)
                | (DobPending, Locked)
                | (SsnPending, Locked)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Locked)
    }
}

impl std::fmt::Display for VerificationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unidentified => "unidentified",
            Self::DobPending => "dob_pending",
            Self::SsnPending => "ssn_pending",
            Self::Verified => "verified",
            Self::Locked => "locked",
        };
        write!(f, "{s}")
    }
}

/// The patient a caller claims to be, captured at identification.
#[derive(Debug, Clone)]
pub struct CandidatePatient {
    pub patient_id: String,
    pub full_name: String,
    date_of_birth: NaiveDate,
}

impl CandidatePatient {
    /// Stored DOB in canonical `YYYY-MM-DD` form.
    pub(crate) fn dob_iso(&self) -> String {
        self.date_of_birth.format("%Y-%m-%d").to_string()
    }
}

impl From<&PatientRecord> for CandidatePatient {
    fn from(record: &PatientRecord) -> Self {
        Self {
            patient_id: record.patient_id.clone(),
            full_name: record.full_name.clone(),
            date_of_birth: record.date_of_birth,
        }
    }
}

/// Verification state for one call.
///
/// Fields are only mutated by the state machine in this module's parent;
/// everything else reads through accessors.
#[derive(Debug, Clone)]
pub struct VerificationSession {
    call_id: String,
    stage: VerificationStage,
    candidate: Option<CandidatePatient>,
    dob_verified: bool,
    dob_attempts: u32,
    ssn_attempts: u32,
    verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl VerificationSession {
    /// Fresh, unidentified session for a call.
    pub fn new(call_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            call_id: call_id.into(),
            stage: VerificationStage::Unidentified,
            candidate: None,
            dob_verified: false,
            dob_attempts: 0,
            ssn_attempts: 0,
            verified_at: None,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn stage(&self) -> VerificationStage {
        self.stage
    }

    pub fn candidate(&self) -> Option<&CandidatePatient> {
        self.candidate.as_ref()
    }

    pub fn candidate_patient_id(&self) -> Option<&str> {
        self.candidate.as_ref().map(|c| c.patient_id.as_str())
    }

    pub fn dob_verified(&self) -> bool {
        self.dob_verified
    }

    pub fn dob_attempts(&self) -> u32 {
        self.dob_attempts
    }

    pub fn ssn_attempts(&self) -> u32 {
        self.ssn_attempts
    }

    pub fn verified_at(&self) -> Option<DateTime<Utc>> {
        self.verified_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn is_verified(&self) -> bool {
        self.stage == VerificationStage::Verified
    }

    pub fn is_locked(&self) -> bool {
        self.stage == VerificationStage::Locked
    }

    pub(super) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub(super) fn identify(&mut self, candidate: CandidatePatient) {
        self.transition_to(VerificationStage::DobPending);
        self.candidate = Some(candidate);
    }

    pub(super) fn record_dob_failure(&mut self) -> u32 {
        debug_assert_eq!(self.stage, VerificationStage::DobPending);
        self.dob_attempts += 1;
        self.dob_attempts
    }

    pub(super) fn mark_dob_verified(&mut self) {
        self.transition_to(VerificationStage::SsnPending);
        self.dob_verified = true;
    }

    pub(super) fn record_ssn_failure(&mut self) -> u32 {
        debug_assert!(self.dob_verified);
        self.ssn_attempts += 1;
        self.ssn_attempts
    }

    pub(super) fn mark_verified(&mut self, now: DateTime<Utc>) {
        debug_assert!(self.dob_verified);
        self.transition_to(VerificationStage::Verified);
        self.verified_at.get_or_insert(now);
    }

    pub(super) fn lock(&mut self) {
        self.transition_to(VerificationStage::Locked);
    }

    fn transition_to(&mut self, next: VerificationStage) {
        debug_assert!(
            self.stage.can_transition_to(next),
            "invalid verification transition {} -> {}",
            self.stage,
            next
        );
        tracing::debug!(
            call_id = %self.call_id,
            from = %self.stage,
            to = %next,
            "Verification stage transition"
        );
        self.stage = next;
    }
}
