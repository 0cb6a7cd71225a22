//! Emergency token value generation.
//!
//! Token values are 32 bytes from the OS CSPRNG, hex-encoded (256 bits of
//! entropy, 64 characters). Hosts without an OS entropy source can opt into
//! a timestamp-based fallback; those values are **not** cryptographically
//! secure and are reported as [`TokenStrength::WeakFallback`].

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::rngs::{OsRng, SmallRng};
use rand::{Rng, SeedableRng, TryRngCore};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::EmergencyError;

/// Number of random bytes behind a secure token value.
pub const TOKEN_BYTES: usize = 32;

/// Length of a secure token value once hex-encoded.
pub const TOKEN_HEX_LEN: usize = TOKEN_BYTES * 2;

/// How a token value was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStrength {
    /// OS CSPRNG, 256 bits.
    Secure,
    /// Pseudo-random number plus millisecond timestamp. Guessable; never use
    /// this in a real deployment.
    WeakFallback,
}

/// A freshly generated token value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedToken {
    pub value: String,
    pub strength: TokenStrength,
}

/// Produces values for `EmergencyToken::token`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenGenerator {
    allow_weak_fallback: bool,
}

impl TokenGenerator {
    /// Create a generator. With `allow_weak_fallback` false (the default), a
    /// failing OS entropy source is an error instead of a weak token.
    pub fn new(allow_weak_fallback: bool) -> Self {
        Self {
            allow_weak_fallback,
        }
    }

    /// Generate a token value at `now`.
    pub fn generate(&self, now: DateTime<Utc>) -> Result<GeneratedToken, EmergencyError> {
        self.generate_from(secure_token(), now)
    }

    fn generate_from(
        &self,
        secure: Result<String, EmergencyError>,
        now: DateTime<Utc>,
    ) -> Result<GeneratedToken, EmergencyError> {
        match secure {
            Ok(value) => Ok(GeneratedToken {
                value,
                strength: TokenStrength::Secure,
            }),
            Err(EmergencyError::EntropyUnavailable(reason)) if self.allow_weak_fallback => {
                warn!(%reason, "OS entropy unavailable, issuing NON-CRYPTOGRAPHIC fallback token");
                Ok(GeneratedToken {
                    value: weak_token(now),
                    strength: TokenStrength::WeakFallback,
                })
            }
            Err(e) => Err(e),
        }
    }
}

/// Generate a 64-char lowercase hex token from the OS CSPRNG.
pub fn secure_token() -> Result<String, EmergencyError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| EmergencyError::EntropyUnavailable(e.to_string()))?;
    Ok(to_hex(&bytes))
}

/// Distinguishes fallback tokens minted in the same nanosecond.
static WEAK_TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Non-cryptographic fallback: base-36 pseudo-random number followed by the
/// base-36 millisecond timestamp.
///
/// Seeded from the clock and a process counter only, so it works when the OS
/// entropy source is down.
pub fn weak_token(now: DateTime<Utc>) -> String {
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_millis()) as u64;
    let count = WEAK_TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
    let noise: u64 = SmallRng::seed_from_u64(nanos ^ count.wrapping_mul(0x9e37_79b9_7f4a_7c15))
        .random();
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    format!("{}{}", to_base36(noise), to_base36(millis))
}

/// SHA-256 hex digest of a token value, used as a lookup key so raw token
/// values are not kept around as map keys.
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::TimeZone;

    use super::*;

    #[test]
    fn secure_token_is_64_lowercase_hex_chars() {
        let token = secure_token().unwrap();
        assert_eq!(token.len(), TOKEN_HEX_LEN);
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    #[test]
    fn secure_tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..1000).map(|_| secure_token().unwrap()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn generator_reports_secure_strength() {
        let generated = TokenGenerator::default().generate(Utc::now()).unwrap();
        assert_eq!(generated.strength, TokenStrength::Secure);
        assert_eq!(generated.value.len(), TOKEN_HEX_LEN);
    }

    #[test]
    fn entropy_failure_is_an_error_without_fallback() {
        let generator = TokenGenerator::new(false);
        let result = generator.generate_from(
            Err(EmergencyError::EntropyUnavailable("no source".into())),
            Utc::now(),
        );
        assert!(matches!(result, Err(EmergencyError::EntropyUnavailable(_))));
    }

    #[test]
    fn entropy_failure_falls_back_to_weak_token_when_allowed() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let generated = TokenGenerator::new(true)
            .generate_from(
                Err(EmergencyError::EntropyUnavailable("no source".into())),
                now,
            )
            .unwrap();
        // The fallback is NOT cryptographic: it must be flagged as such.
        assert_eq!(generated.strength, TokenStrength::WeakFallback);
        assert!(generated.value.ends_with(&to_base36(1_700_000_000_000)));
    }

    #[test]
    fn weak_token_embeds_the_timestamp() {
        let now = Utc.timestamp_millis_opt(36).unwrap();
        assert!(weak_token(now).ends_with("10"));
    }

    #[test]
    fn weak_tokens_at_the_same_instant_differ() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let tokens: HashSet<String> = (0..100).map(|_| weak_token(now)).collect();
        assert_eq!(tokens.len(), 100);
    }

    #[test]
    fn base36_encoding() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn fingerprint_is_stable_sha256_hex() {
        let a = fingerprint("abc");
        assert_eq!(
            a,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(a, fingerprint("abd"));
    }
}
