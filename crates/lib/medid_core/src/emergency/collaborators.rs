//! Collaborator seams for the emergency access flow.
//!
//! The controller depends only on these traits. The stub implementations
//! here stand in for a credential service, the QR scanning workflow and a
//! patient-data service until real ones exist.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

use super::models::{MedicalSummary, PatientSnapshot};

/// Masked id substituted for unreadable scans under
/// `MalformedScanPolicy::Placeholder`.
///
/// Mapping a malformed scan onto a fixed record can show the wrong
/// patient; only use it through an explicit placeholder policy.
pub const PLACEHOLDER_PATIENT_ID: &str = "PAT001";

/// Failure talking to a collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

/// Scanned code could not be turned into a patient handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed scan code: {code:?}")]
pub struct MalformedScanCode {
    pub code: String,
}

/// Answers whether a doctor may use emergency access.
#[async_trait]
pub trait CredentialChecker: Send + Sync {
    /// Checked once, at issuance.
    async fn is_authorized(&self, doctor_id: &str) -> Result<bool, CollaboratorError>;

    /// Checked on every verification; a doctor can be revoked mid-window.
    async fn is_active(&self, doctor_id: &str) -> Result<bool, CollaboratorError>;
}

/// Maps a scanned code to a masked patient id. Must be deterministic.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, scanned_code: &str) -> Result<String, MalformedScanCode>;
}

/// Returns the masked medical summary for a patient.
///
/// `doctor_id` is forwarded for the provider's own authorization and audit.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn get_snapshot(
        &self,
        patient_masked_id: &str,
        doctor_id: &str,
    ) -> Result<Option<PatientSnapshot>, CollaboratorError>;
}

/// In-process credential checker: either permits everyone or an explicit
/// allow-list, with a revocation set that can change at runtime.
#[derive(Debug, Default)]
pub struct StaticCredentialChecker {
    allowed: Option<HashSet<String>>,
    revoked: RwLock<HashSet<String>>,
}

impl StaticCredentialChecker {
    /// Every doctor is authorized and active until revoked.
    pub fn permit_all() -> Self {
        Self::default()
    }

    /// Only the listed doctors are authorized.
    pub fn allow<I, S>(doctor_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: Some(doctor_ids.into_iter().map(Into::into).collect()),
            revoked: RwLock::new(HashSet::new()),
        }
    }

    /// Mark a doctor inactive. Tokens already issued to them stop verifying.
    pub fn revoke(&self, doctor_id: &str) {
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.insert(doctor_id.to_string());
        }
    }

    /// Undo [`revoke`](Self::revoke).
    pub fn reinstate(&self, doctor_id: &str) {
        if let Ok(mut revoked) = self.revoked.write() {
            revoked.remove(doctor_id);
        }
    }

    fn is_listed(&self, doctor_id: &str) -> bool {
        self.allowed
            .as_ref()
            .is_none_or(|allowed| allowed.contains(doctor_id))
    }

    fn is_revoked(&self, doctor_id: &str) -> Result<bool, CollaboratorError> {
        self.revoked
            .read()
            .map(|revoked| revoked.contains(doctor_id))
            .map_err(|e| CollaboratorError::Unavailable(format!("revocation list poisoned: {e}")))
    }
}

#[async_trait]
impl CredentialChecker for StaticCredentialChecker {
    async fn is_authorized(&self, doctor_id: &str) -> Result<bool, CollaboratorError> {
        Ok(self.is_listed(doctor_id) && !self.is_revoked(doctor_id)?)
    }

    async fn is_active(&self, doctor_id: &str) -> Result<bool, CollaboratorError> {
        Ok(self.is_listed(doctor_id) && !self.is_revoked(doctor_id)?)
    }
}

/// Decodes codes of the form `QR-<maskedId>`: split on the separator and
/// take the second segment.
#[derive(Debug, Clone)]
pub struct SeparatorQrDecoder {
    separator: char,
}

impl SeparatorQrDecoder {
    pub fn new(separator: char) -> Self {
        Self { separator }
    }
}

impl Default for SeparatorQrDecoder {
    fn default() -> Self {
        Self::new('-')
    }
}

impl QrDecoder for SeparatorQrDecoder {
    fn decode(&self, scanned_code: &str) -> Result<String, MalformedScanCode> {
        match scanned_code.split(self.separator).nth(1) {
            Some(id) if !id.trim().is_empty() => Ok(id.to_string()),
            _ => Err(MalformedScanCode {
                code: scanned_code.to_string(),
            }),
        }
    }
}

/// Snapshot provider backed by a map of masked id to snapshot.
#[derive(Debug, Default)]
pub struct InMemorySnapshotProvider {
    snapshots: HashMap<String, PatientSnapshot>,
}

impl InMemorySnapshotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the snapshot returned for `patient_masked_id`.
    pub fn insert(&mut self, patient_masked_id: impl Into<String>, snapshot: PatientSnapshot) {
        self.snapshots.insert(patient_masked_id.into(), snapshot);
    }

    pub fn with_snapshot(
        mut self,
        patient_masked_id: impl Into<String>,
        snapshot: PatientSnapshot,
    ) -> Self {
        self.insert(patient_masked_id, snapshot);
        self
    }

    /// Provider preloaded with the demo roster (PAT100 to PAT500).
    pub fn with_demo_patients() -> Self {
        demo_roster()
            .into_iter()
            .fold(Self::new(), |provider, summary| {
                let id = summary.masked_id.clone();
                provider.with_snapshot(id, summary.into())
            })
    }
}

#[async_trait]
impl SnapshotProvider for InMemorySnapshotProvider {
    async fn get_snapshot(
        &self,
        patient_masked_id: &str,
        _doctor_id: &str,
    ) -> Result<Option<PatientSnapshot>, CollaboratorError> {
        Ok(self.snapshots.get(patient_masked_id).cloned())
    }
}

fn demo_roster() -> Vec<MedicalSummary> {
    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    vec![
        MedicalSummary {
            masked_id: "PAT100".into(),
            name: "John Doe (Masked)".into(),
            age: 32,
            blood_group: "O+".into(),
            allergies: strings(&["Penicillin", "Peanuts"]),
            medications: strings(&["Lisinopril 10mg", "Metformin 500mg"]),
            conditions: strings(&["Hypertension", "Type 2 Diabetes"]),
            last_visit: "2024-01-15".into(),
            emergency_contacts: strings(&["Jane Doe: +91 9876543210"]),
        },
        MedicalSummary {
            masked_id: "PAT200".into(),
            name: "Sarah Smith (Masked)".into(),
            age: 45,
            blood_group: "A-".into(),
            medications: strings(&["Metformin"]),
            conditions: strings(&["Diabetes"]),
            last_visit: "2024-01-10".into(),
            ..Default::default()
        },
        MedicalSummary {
            masked_id: "PAT300".into(),
            name: "Michael Chen (Masked)".into(),
            age: 28,
            blood_group: "B+".into(),
            medications: strings(&["Albuterol"]),
            conditions: strings(&["Asthma"]),
            last_visit: "2024-01-05".into(),
            ..Default::default()
        },
        MedicalSummary {
            masked_id: "PAT400".into(),
            name: "Emma Wilson (Masked)".into(),
            age: 65,
            blood_group: "AB+".into(),
            medications: strings(&["Aspirin"]),
            conditions: strings(&["Cardiac"]),
            last_visit: "2023-12-20".into(),
            ..Default::default()
        },
        MedicalSummary {
            masked_id: "PAT500".into(),
            name: "Robert Brown (Masked)".into(),
            age: 52,
            blood_group: "O-".into(),
            medications: strings(&["Ibuprofen"]),
            conditions: strings(&["Arthritis"]),
            last_visit: "2023-12-15".into(),
            ..Default::default()
        },
    ]
}
