//! Patient record and credential digest types.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::DirectoryError;

static PHONE_NOISE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-\.\(\)]").expect("valid phone noise regex"));

static PHONE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9]{7,15}$").expect("valid phone shape regex"));

static SSN_LAST4_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}$").expect("valid ssn regex"));

/// Canonical form of a phone number, or `None` if it cannot be one.
///
/// Strips spaces, dashes, dots and parentheses; keeps a leading `+`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact = PHONE_NOISE.replace_all(raw.trim(), "");
    PHONE_SHAPE
        .is_match(&compact)
        .then(|| compact.into_owned())
}

/// SHA-256 digest of the last four SSN digits.
///
/// The raw bytes never leave this type: `Debug` is opaque and there is no
/// accessor.
#[derive(Clone, PartialEq, Eq)]
pub struct SsnDigest([u8; 32]);

impl SsnDigest {
    /// Digest four decimal digits. Returns `None` for anything else.
    pub fn from_digits(last4: &str) -> Option<Self> {
        let trimmed = last4.trim();
        SSN_LAST4_SHAPE
            .is_match(trimmed)
            .then(|| Self::compute(trimmed))
    }

    /// Parse a stored lowercase or uppercase hex digest.
    pub fn from_hex(encoded: &str) -> Result<Self, String> {
        let bytes = hex::decode(encoded.trim()).map_err(|e| format!("bad hex digest: {e}"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("digest is {} bytes, expected 32", b.len()))?;
        Ok(Self(array))
    }

    /// Constant-time check of caller-supplied digits against this digest.
    ///
    /// Malformed input never matches.
    pub fn matches(&self, supplied: &str) -> bool {
        match Self::from_digits(supplied) {
            Some(candidate) => bool::from(self.0.ct_eq(&candidate.0)),
            None => false,
        }
    }

    fn compute(digits: &str) -> Self {
        Self(Sha256::digest(digits.as_bytes()).into())
    }
}

impl std::fmt::Debug for SsnDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SsnDigest(..)")
    }
}

/// An immutable patient identity record.
#[derive(Debug, Clone)]
pub struct PatientRecord {
    pub patient_id: String,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    /// Normalized phone numbers this patient is reachable from.
    pub phone_numbers: Vec<String>,
    pub ssn_last4_digest: SsnDigest,
}

impl PatientRecord {
    /// Build a record from plaintext last-4 digits. Used for seeding.
    pub fn new(
        patient_id: impl Into<String>,
        full_name: impl Into<String>,
        date_of_birth: NaiveDate,
        phone_numbers: &[&str],
        ssn_last4: &str,
    ) -> Result<Self, DirectoryError> {
        let patient_id = patient_id.into();
        let ssn_last4_digest =
            SsnDigest::from_digits(ssn_last4).ok_or_else(|| DirectoryError::InvalidRecord {
                patient_id: patient_id.clone(),
                reason: "SSN last-4 must be four digits".to_string(),
            })?;
        let phone_numbers = normalize_all(&patient_id, phone_numbers.iter().copied())?;
        Ok(Self {
            patient_id,
            full_name: full_name.into(),
            date_of_birth,
            phone_numbers,
            ssn_last4_digest,
        })
    }

    /// Date of birth in the canonical `YYYY-MM-DD` form.
    pub fn dob_iso(&self) -> String {
        self.date_of_birth.format("%Y-%m-%d").to_string()
    }
}

/// On-disk shape of a directory entry.
#[derive(Debug, Deserialize)]
pub struct PatientRecordEntry {
    pub patient_id: String,
    pub full_name: String,
    pub date_of_birth: String,
    #[serde(default)]
    pub phone_numbers: Vec<String>,
    pub ssn_last4_sha256: String,
}

impl TryFrom<PatientRecordEntry> for PatientRecord {
    type Error = DirectoryError;

    fn try_from(entry: PatientRecordEntry) -> Result<Self, Self::Error> {
        let invalid = |reason: String| DirectoryError::InvalidRecord {
            patient_id: entry.patient_id.clone(),
            reason,
        };

        if entry.patient_id.trim().is_empty() {
            return Err(invalid("patient_id is empty".to_string()));
        }
        let date_of_birth = NaiveDate::parse_from_str(entry.date_of_birth.trim(), "%Y-%m-%d")
            .map_err(|e| invalid(format!("date_of_birth: {e}")))?;
        let ssn_last4_digest = SsnDigest::from_hex(&entry.ssn_last4_sha256).map_err(invalid)?;
        let phone_numbers = normalize_all(
            &entry.patient_id,
            entry.phone_numbers.iter().map(String::as_str),
        )?;

        Ok(Self {
            patient_id: entry.patient_id.trim().to_string(),
            full_name: entry.full_name,
            date_of_birth,
            phone_numbers,
            ssn_last4_digest,
        })
    }
}

fn normalize_all<'a>(
    patient_id: &str,
    raw: impl Iterator<Item = &'a str>,
) -> Result<Vec<String>, DirectoryError> {
    raw.map(|phone| {
        normalize_phone(phone).ok_or_else(|| DirectoryError::InvalidRecord {
            patient_id: patient_id.to_string(),
            reason: format!("unusable phone number {phone:?}"),
        })
    })
    .collect()
}
