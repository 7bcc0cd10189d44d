//! Caller verification: the three-factor identity check.
//!
//! A caller is identified by phone number or patient ID, then proves it with
//! their date of birth and the last four digits of their SSN. Each factor has
//! its own bounded attempt counter; exhausting either locks the call. The
//! machine itself never performs I/O. It returns a reply and an ordered list
//! of intents that the gateway dispatches.

pub mod intent;
pub mod machine;
pub mod session;

pub use intent::{AuditEvent, CallIntent, Intent, SecurityEventType};
pub use machine::{
    Factor, IdentifyMethod, Outcome, Transition, VerificationEvent, VerificationMachine,
    normalize_dob,
};
pub use session::{CandidatePatient, VerificationSession, VerificationStage};
