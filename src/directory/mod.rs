//! Patient directory: read-only identity lookups.
//!
//! The directory is an external collaborator from the gateway's point of
//! view: lookups may involve I/O, so they happen in the gateway before the
//! verification state machine runs, never inside it.

pub mod memory;
pub mod model;

use async_trait::async_trait;

use crate::error::DirectoryError;

pub use memory::InMemoryDirectory;
pub use model::{PatientRecord, SsnDigest, normalize_phone};

/// Backend-agnostic read-only patient directory.
///
/// `Ok(None)` means the patient was not found. `Err` means the backend could
/// not answer.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    /// Look a patient up by caller phone number.
    async fn lookup_by_phone(&self, phone: &str) -> Result<Option<PatientRecord>, DirectoryError>;

    /// Look a patient up by patient ID.
    async fn lookup_by_id(&self, patient_id: &str)
    -> Result<Option<PatientRecord>, DirectoryError>;

    /// Compare supplied last-4 SSN digits with the stored digest in constant
    /// time. Unknown patients never match.
    async fn verify_ssn(&self, patient_id: &str, last4: &str) -> Result<bool, DirectoryError> {
        Ok(self
            .lookup_by_id(patient_id)
            .await?
            .is_some_and(|record| record.ssn_last4_digest.matches(last4)))
    }
}
