//! # Engine Primitives
//!
//! Hardcoded limits and constants for the pipeline engine.
//!
//! These are compiled into the binary and are immutable at runtime.
//! Every free-text input is bounded so a single request cannot grow an
//! aggregate without limit.

/// Maximum length for free-text inputs (pendency descriptions, notes, reasons).
pub const MAX_TEXT_LENGTH: usize = 4096;

/// Maximum length for stage and requirement names.
pub const MAX_NAME_LENGTH: usize = 128;

/// Maximum length for a checklist field key.
pub const MAX_FIELD_KEY_LENGTH: usize = 64;

/// Maximum length for a contract number.
pub const MAX_CONTRACT_NUMBER_LENGTH: usize = 64;

/// Default age, in days, after which an open proposal raises an alert.
pub const DEFAULT_PROPOSAL_ALERT_DAYS: u32 = 7;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_are_ordered() {
        assert!(MAX_FIELD_KEY_LENGTH <= MAX_NAME_LENGTH);
        assert!(MAX_NAME_LENGTH < MAX_TEXT_LENGTH);
    }
}
