//! Validation of the lifecycle controls shared by the dispatcher and the
//! process entry point.

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound for any channel capacity or worker count.
///
/// Capacities size bounded channels up front, so an absurd value is far
/// more likely a typo than an intent.
pub const MAX_CAPACITY: usize = 65_536;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a capacity-like control (queue capacity, worker capacity,
/// worker count).
///
/// Rules:
/// - Must be at least 1.
/// - Must not exceed [`MAX_CAPACITY`].
pub fn validate_capacity(name: &str, value: usize) -> Result<usize, CoreError> {
    if value == 0 {
        return Err(CoreError::Validation(format!(
            "{name} must be at least 1"
        )));
    }
    if value > MAX_CAPACITY {
        return Err(CoreError::Validation(format!(
            "{name} must not exceed {MAX_CAPACITY}, got {value}"
        )));
    }
    Ok(value)
}

/// Parse and validate a capacity-like control from its textual form.
pub fn parse_capacity(name: &str, raw: &str) -> Result<usize, CoreError> {
    let value: usize = raw.trim().parse().map_err(|_| {
        CoreError::Validation(format!("{name} must be a positive integer, got \"{raw}\""))
    })?;
    validate_capacity(name, value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_rejected() {
        let err = validate_capacity("queue capacity", 0).unwrap_err();
        assert!(err.to_string().contains("queue capacity must be at least 1"));
    }

    #[test]
    fn one_and_max_are_accepted() {
        assert_eq!(validate_capacity("workers", 1).unwrap(), 1);
        assert_eq!(validate_capacity("workers", MAX_CAPACITY).unwrap(), MAX_CAPACITY);
    }

    #[test]
    fn above_max_is_rejected() {
        assert!(validate_capacity("workers", MAX_CAPACITY + 1).is_err());
    }

    #[test]
    fn parse_trims_whitespace() {
        assert_eq!(parse_capacity("workers", " 8 ").unwrap(), 8);
    }

    #[test]
    fn parse_rejects_garbage_and_negatives() {
        assert!(parse_capacity("workers", "eight").is_err());
        assert!(parse_capacity("workers", "-1").is_err());
        assert!(parse_capacity("workers", "0").is_err());
    }
}
