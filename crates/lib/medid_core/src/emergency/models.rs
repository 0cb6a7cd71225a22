//! Emergency access domain models.
//!
//! Serialized as camelCase JSON so persisted log rows keep the field names
//! the portal front-end reads (`doctorId`, `patientMaskedId`, ...).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// Access level granted by an emergency token. Read-only is the only level
/// this flow ever grants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessType {
    #[default]
    #[serde(rename = "read-only")]
    ReadOnly,
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessType::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// Triage classification carried on a token for downstream audit. The
/// controller does not enforce it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyLevel {
    #[default]
    Critical,
    High,
    Moderate,
}

impl fmt::Display for EmergencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmergencyLevel::Critical => write!(f, "critical"),
            EmergencyLevel::High => write!(f, "high"),
            EmergencyLevel::Moderate => write!(f, "moderate"),
        }
    }
}

impl FromStr for EmergencyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(EmergencyLevel::Critical),
            "high" => Ok(EmergencyLevel::High),
            "moderate" => Ok(EmergencyLevel::Moderate),
            other => Err(format!("unknown emergency level: {other}")),
        }
    }
}

/// Time-boxed, read-only grant for one doctor to read one patient's summary.
///
/// Fields are private: a token is never mutated after issuance, only
/// rejected once it expires or its doctor is revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyToken {
    token: String,
    doctor_id: String,
    patient_masked_id: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_type: AccessType,
    emergency_level: EmergencyLevel,
}

impl EmergencyToken {
    /// `None` when `issued_at + window` is past the representable range.
    pub(crate) fn new(
        token: String,
        doctor_id: &str,
        patient_masked_id: String,
        issued_at: DateTime<Utc>,
        window: Duration,
        emergency_level: EmergencyLevel,
    ) -> Option<Self> {
        let expires_at = issued_at.checked_add_signed(window)?;
        Some(Self {
            token,
            doctor_id: doctor_id.to_string(),
            patient_masked_id,
            issued_at,
            expires_at,
            access_type: AccessType::ReadOnly,
            emergency_level,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn doctor_id(&self) -> &str {
        &self.doctor_id
    }

    pub fn patient_masked_id(&self) -> &str {
        &self.patient_masked_id
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    pub fn emergency_level(&self) -> EmergencyLevel {
        self.emergency_level
    }

    /// True once `now` is strictly past `expires_at`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Time left before expiry, zero when already expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Where an emergency access request came from. Either field may be
/// unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessContext {
    pub ip_address: Option<String>,
    pub location: Option<String>,
}

impl AccessContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ip_address(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// Audit row written for every successful token issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    /// UUIDv7, so rows sort by creation time.
    pub id: Uuid,
    #[serde(flatten)]
    pub token: EmergencyToken,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

impl AccessLogEntry {
    /// Build the audit row for `token` issued under `context`.
    pub fn record(token: &EmergencyToken, context: &AccessContext) -> Self {
        Self {
            id: Uuid::now_v7(),
            token: token.clone(),
            ip_address: context.ip_address.clone(),
            location: context.location.clone(),
        }
    }

    /// Case-insensitive match against the patient masked id or doctor id.
    /// `needle` must already be lowercase.
    pub(crate) fn matches(&self, needle: &str) -> bool {
        self.token
            .patient_masked_id()
            .to_lowercase()
            .contains(needle)
            || self.token.doctor_id().to_lowercase().contains(needle)
    }
}

/// Masked medical summary handed back to the clinician.
///
/// Its shape belongs to the snapshot provider; the controller passes it
/// through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientSnapshot(Value);

impl PatientSnapshot {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Look up a top-level field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for PatientSnapshot {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Typed masked summary used by the built-in snapshot provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MedicalSummary {
    pub masked_id: String,
    pub name: String,
    pub age: u32,
    pub blood_group: String,
    pub allergies: Vec<String>,
    pub medications: Vec<String>,
    pub conditions: Vec<String>,
    pub last_visit: String,
    pub emergency_contacts: Vec<String>,
}

impl From<MedicalSummary> for PatientSnapshot {
    fn from(s: MedicalSummary) -> Self {
        Self(json!({
            "id": s.masked_id,
            "name": s.name,
            "age": s.age,
            "bloodGroup": s.blood_group,
            "allergies": s.allergies,
            "medications": s.medications,
            "conditions": s.conditions,
            "lastVisit": s.last_visit,
            "emergencyContacts": s.emergency_contacts,
        }))
    }
}
