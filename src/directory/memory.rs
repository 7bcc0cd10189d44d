//! In-memory patient directory loaded once at startup.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::info;

use super::PatientDirectory;
use super::model::{PatientRecord, PatientRecordEntry, normalize_phone};
use crate::error::DirectoryError;

/// Immutable directory indexed by patient ID and phone number.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    by_id: HashMap<String, PatientRecord>,
    /// Normalized phone number → patient ID.
    by_phone: HashMap<String, String>,
}

impl InMemoryDirectory {
    /// Build a directory, rejecting duplicate IDs and shared phone numbers.
    pub fn from_records(
        records: impl IntoIterator<Item = PatientRecord>,
    ) -> Result<Self, DirectoryError> {
        let mut directory = Self::default();
        for record in records {
            if directory.by_id.contains_key(&record.patient_id) {
                return Err(DirectoryError::Duplicate {
                    field: "patient_id",
                    value: record.patient_id,
                });
            }
            for phone in &record.phone_numbers {
                if directory.by_phone.contains_key(phone) {
                    return Err(DirectoryError::Duplicate {
                        field: "phone_number",
                        value: phone.clone(),
                    });
                }
                directory
                    .by_phone
                    .insert(phone.clone(), record.patient_id.clone());
            }
            directory.by_id.insert(record.patient_id.clone(), record);
        }
        Ok(directory)
    }

    /// Load a JSON array of directory entries from disk.
    pub async fn load(path: &Path) -> Result<Self, DirectoryError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DirectoryError::Read {
                path: path.display().to_string(),
                source,
            })?;
        let directory = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            patients = directory.len(),
            "Patient directory loaded"
        );
        Ok(directory)
    }

    /// Parse a JSON array of directory entries.
    pub fn from_json(raw: &str) -> Result<Self, DirectoryError> {
        let entries: Vec<PatientRecordEntry> = serde_json::from_str(raw)?;
        let records = entries
            .into_iter()
            .map(PatientRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_records(records)
    }

    /// Built-in demo roster.
    pub fn demo() -> Result<Self, DirectoryError> {
        let dob = |y, m, d| {
            NaiveDate::from_ymd_opt(y, m, d).ok_or_else(|| DirectoryError::InvalidRecord {
                patient_id: "demo".to_string(),
                reason: format!("invalid date {y}-{m}-{d}"),
            })
        };
        Self::from_records([
            PatientRecord::new(
                "P001",
                "John Smith",
                dob(1985, 3, 15)?,
                &["+15551234567"],
                "1234",
            )?,
            PatientRecord::new(
                "P002",
                "Jane Doe",
                dob(1990, 7, 22)?,
                &["+15559876543"],
                "5678",
            )?,
        ])
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[async_trait]
impl PatientDirectory for InMemoryDirectory {
    async fn lookup_by_phone(&self, phone: &str) -> Result<Option<PatientRecord>, DirectoryError> {
        let Some(normalized) = normalize_phone(phone) else {
            return Ok(None);
        };
        Ok(self
            .by_phone
            .get(&normalized)
            .and_then(|id| self.by_id.get(id))
            .cloned())
    }

    async fn lookup_by_id(
        &self,
        patient_id: &str,
    ) -> Result<Option<PatientRecord>, DirectoryError> {
        Ok(self.by_id.get(patient_id.trim()).cloned())
    }
}
