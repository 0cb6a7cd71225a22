//! # medid_core
//!
//! Core domain logic for MedID: QR-triggered, time-boxed, read-only
//! emergency access to masked patient summaries, with an audit trail of
//! every token issued.

pub mod config;
pub mod emergency;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
