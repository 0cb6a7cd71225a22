//! Emergency access: QR-triggered, time-boxed, read-only access to a
//! patient's masked medical summary.
//!
//! A doctor scans a patient's code and receives an [`EmergencyToken`]
//! valid for the configured window (15 minutes by default). Presenting the
//! token returns the patient snapshot while the token is unexpired and the
//! doctor is still active. Every issuance is written to the access log
//! before the token is handed out.
//!
//! # Public API
//!
//! - [`EmergencyAccessController::issue_access`]: authorize, decode, mint and log a token
//! - [`EmergencyAccessController::verify_and_access`]: check a token and fetch the snapshot
//! - [`EmergencyAccessController::access_logs`]: every audit row, in order
//! - [`EmergencyAccessController::search_access_logs`]: audit rows filtered by patient or doctor

pub mod clock;
pub mod collaborators;
pub mod controller;
pub mod log_store;
pub mod models;
pub mod token;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    CollaboratorError, CredentialChecker, InMemorySnapshotProvider, MalformedScanCode,
    PLACEHOLDER_PATIENT_ID, QrDecoder, SeparatorQrDecoder, SnapshotProvider,
    StaticCredentialChecker,
};
pub use controller::EmergencyAccessController;
pub use log_store::{AccessLogStore, JsonFileAccessLogStore, LogStoreError, MemoryAccessLogStore};
pub use models::{
    AccessContext, AccessLogEntry, AccessType, EmergencyLevel, EmergencyToken, MedicalSummary,
    PatientSnapshot,
};

/// Errors returned by the emergency access flow.
#[derive(Debug, Error)]
pub enum EmergencyError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Doctor not authorized for emergency access: {0}")]
    DoctorNotAuthorized(String),

    #[error("Emergency access token expired at {expired_at}")]
    TokenExpired { expired_at: DateTime<Utc> },

    #[error("Doctor authorization revoked: {0}")]
    DoctorAuthorizationRevoked(String),

    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    #[error(transparent)]
    MalformedScanCode(#[from] MalformedScanCode),

    #[error("Emergency access token was not issued by this controller")]
    UnknownToken,

    #[error("Emergency window {window:?} puts token expiry out of range")]
    ExpiryOutOfRange { window: Duration },

    #[error("Secure random source unavailable: {0}")]
    EntropyUnavailable(String),

    #[error("{collaborator} did not respond within {after:?}")]
    CollaboratorTimeout {
        collaborator: &'static str,
        after: Duration,
    },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("Access log error: {0}")]
    LogStore(#[from] LogStoreError),
}
