//! Emergency access controller: issue, verify and audit emergency tokens.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use super::EmergencyError;
use super::clock::{Clock, SystemClock};
use super::collaborators::{CredentialChecker, QrDecoder, SnapshotProvider};
use super::log_store::{AccessLogStore, LogStoreError};
use super::models::{AccessContext, AccessLogEntry, EmergencyToken, PatientSnapshot};
use super::token::{self, TokenGenerator, TokenStrength};
use crate::config::{ConfigError, EmergencyConfig, MalformedScanPolicy, TokenVerification};

/// Gates and audits emergency access to patient snapshots.
///
/// Holds no global state: every instance owns its collaborators, its log
/// store and (in registry mode) its own record of issued tokens. Share it
/// behind an `Arc` to serve concurrent callers.
pub struct EmergencyAccessController {
    credentials: Arc<dyn CredentialChecker>,
    decoder: Arc<dyn QrDecoder>,
    snapshots: Arc<dyn SnapshotProvider>,
    log_store: Arc<dyn AccessLogStore>,
    clock: Arc<dyn Clock>,
    config: EmergencyConfig,
    window: chrono::Duration,
    generator: TokenGenerator,
    /// Issued tokens keyed by fingerprint. Only populated in
    /// `TokenVerification::Registry` mode.
    issued: DashMap<String, EmergencyToken>,
}

impl EmergencyAccessController {
    /// Build a controller. Fails if `config` does not validate.
    pub fn new(
        credentials: Arc<dyn CredentialChecker>,
        decoder: Arc<dyn QrDecoder>,
        snapshots: Arc<dyn SnapshotProvider>,
        log_store: Arc<dyn AccessLogStore>,
        config: EmergencyConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let window =
            chrono::Duration::from_std(config.emergency_window).map_err(|e| ConfigError::Invalid {
                key: "emergency_window".into(),
                value: format!("{:?}", config.emergency_window),
                reason: e.to_string(),
            })?;

        Ok(Self {
            credentials,
            decoder,
            snapshots,
            log_store,
            clock: Arc::new(SystemClock),
            generator: TokenGenerator::new(config.allow_weak_token_fallback),
            window,
            config,
            issued: DashMap::new(),
        })
    }

    /// Replace the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EmergencyConfig {
        &self.config
    }

    /// Issue a read-only emergency token for `doctor_id` from a scanned code.
    ///
    /// Nothing is logged and no token exists unless every step succeeds,
    /// including the audit write.
    pub async fn issue_access(
        &self,
        doctor_id: &str,
        scanned_code: &str,
        context: &AccessContext,
    ) -> Result<EmergencyToken, EmergencyError> {
        if doctor_id.trim().is_empty() {
            return Err(EmergencyError::InvalidRequest(
                "doctor id must not be empty".into(),
            ));
        }

        let authorized = self
            .bounded("credential checker", self.credentials.is_authorized(doctor_id))
            .await?;
        if !authorized {
            warn!(doctor_id, "emergency access refused: doctor not authorized");
            return Err(EmergencyError::DoctorNotAuthorized(doctor_id.to_string()));
        }

        let patient_masked_id = match self.decoder.decode(scanned_code) {
            Ok(id) => id,
            Err(e) => match &self.config.malformed_scan_policy {
                MalformedScanPolicy::Reject => {
                    warn!(doctor_id, "emergency access refused: malformed scan code");
                    return Err(e.into());
                }
                MalformedScanPolicy::Placeholder(placeholder) => {
                    warn!(
                        doctor_id,
                        placeholder = %placeholder,
                        "malformed scan code, substituting placeholder patient id"
                    );
                    placeholder.clone()
                }
            },
        };

        let now = self.clock.now();
        let generated = self.generator.generate(now)?;
        if generated.strength == TokenStrength::WeakFallback {
            warn!(doctor_id, "issuing emergency token from NON-CRYPTOGRAPHIC fallback");
        }

        let token = EmergencyToken::new(
            generated.value,
            doctor_id,
            patient_masked_id,
            now,
            self.window,
            self.config.default_emergency_level,
        )
        .ok_or_else(|| {
            warn!(doctor_id, window = ?self.config.emergency_window, "expiry out of range");
            EmergencyError::ExpiryOutOfRange {
                window: self.config.emergency_window,
            }
        })?;

        let entry = AccessLogEntry::record(&token, context);
        self.append_log(&entry).await?;

        if self.config.token_verification == TokenVerification::Registry {
            self.issued.retain(|_, issued| !issued.is_expired_at(now));
            self.issued
                .insert(token::fingerprint(token.token()), token.clone());
        }

        info!(
            doctor_id,
            patient_masked_id = token.patient_masked_id(),
            expires_at = %token.expires_at(),
            emergency_level = %token.emergency_level(),
            log_entry = %entry.id,
            "emergency access token issued"
        );
        Ok(token)
    }

    /// Check `token` and return the patient's snapshot, unmodified.
    ///
    /// The token is not consumed and no log row is written; it can be
    /// presented again until it expires.
    pub async fn verify_and_access(
        &self,
        token: &EmergencyToken,
    ) -> Result<PatientSnapshot, EmergencyError> {
        let now = self.clock.now();
        if token.is_expired_at(now) {
            warn!(
                doctor_id = token.doctor_id(),
                expired_at = %token.expires_at(),
                "emergency access refused: token expired"
            );
            return Err(EmergencyError::TokenExpired {
                expired_at: token.expires_at(),
            });
        }

        if self.config.token_verification == TokenVerification::Registry {
            let known = self
                .issued
                .get(&token::fingerprint(token.token()))
                .is_some_and(|issued| *issued == *token);
            if !known {
                warn!(
                    doctor_id = token.doctor_id(),
                    "emergency access refused: unknown token"
                );
                return Err(EmergencyError::UnknownToken);
            }
        }

        let active = self
            .bounded("credential checker", self.credentials.is_active(token.doctor_id()))
            .await?;
        if !active {
            warn!(
                doctor_id = token.doctor_id(),
                "emergency access refused: doctor authorization revoked"
            );
            return Err(EmergencyError::DoctorAuthorizationRevoked(
                token.doctor_id().to_string(),
            ));
        }

        let snapshot = self
            .bounded(
                "snapshot provider",
                self.snapshots
                    .get_snapshot(token.patient_masked_id(), token.doctor_id()),
            )
            .await?
            .ok_or_else(|| EmergencyError::PatientNotFound(token.patient_masked_id().to_string()))?;

        info!(
            doctor_id = token.doctor_id(),
            patient_masked_id = token.patient_masked_id(),
            remaining_secs = token.remaining_at(now).num_seconds(),
            "emergency access granted"
        );
        Ok(snapshot)
    }

    /// Every audit row recorded so far, in insertion order.
    pub async fn access_logs(&self) -> Result<Vec<AccessLogEntry>, EmergencyError> {
        match tokio::time::timeout(self.config.collaborator_timeout, self.log_store.entries())
            .await
        {
            Ok(entries) => Ok(entries?),
            Err(_) => Err(LogStoreError::Timeout(self.config.collaborator_timeout).into()),
        }
    }

    /// Audit rows whose patient masked id or doctor id contains `term`,
    /// ignoring case. A blank term returns every row.
    pub async fn search_access_logs(
        &self,
        term: &str,
    ) -> Result<Vec<AccessLogEntry>, EmergencyError> {
        let entries = self.access_logs().await?;
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(entries);
        }
        Ok(entries.into_iter().filter(|e| e.matches(&needle)).collect())
    }

    async fn append_log(&self, entry: &AccessLogEntry) -> Result<(), EmergencyError> {
        let timeout = self.config.collaborator_timeout;
        let result = match tokio::time::timeout(timeout, self.log_store.append(entry)).await {
            Ok(result) => result,
            Err(_) => Err(LogStoreError::Timeout(timeout)),
        };
        result.map_err(|e| {
            warn!(error = %e, "emergency access refused: access log write failed");
            e.into()
        })
    }

    /// Await a collaborator call under the configured timeout.
    async fn bounded<T, E>(
        &self,
        collaborator: &'static str,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, EmergencyError>
    where
        EmergencyError: From<E>,
    {
        let after = self.config.collaborator_timeout;
        match tokio::time::timeout(after, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                warn!(collaborator, ?after, "collaborator call timed out");
                Err(EmergencyError::CollaboratorTimeout {
                    collaborator,
                    after,
                })
            }
        }
    }
}
