//! Validation utilities for the studio operations platform

use std::collections::HashSet;

/// Shortest barcode accepted at intake
pub const MIN_BARCODE_LEN: usize = 6;

/// Longest barcode accepted at intake
pub const MAX_BARCODE_LEN: usize = 32;

// ============================================================================
// Barcodes
// ============================================================================

/// Validate a product barcode (digits only, 6-32 characters)
pub fn validate_barcode(barcode: &str) -> Result<(), &'static str> {
    if barcode.len() < MIN_BARCODE_LEN {
        return Err("Barcode is too short");
    }
    if barcode.len() > MAX_BARCODE_LEN {
        return Err("Barcode is too long");
    }
    if !barcode.chars().all(|c| c.is_ascii_digit()) {
        return Err("Barcode must contain digits only");
    }
    Ok(())
}

/// Trim, drop empty entries and de-duplicate a scanned barcode list,
/// keeping first-seen order.
pub fn normalize_barcodes<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

/// Split barcodes into (valid, invalid-with-reason)
pub fn partition_barcodes(barcodes: &[String]) -> (Vec<String>, Vec<(String, &'static str)>) {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for barcode in barcodes {
        match validate_barcode(barcode) {
            Ok(()) => valid.push(barcode.clone()),
            Err(reason) => invalid.push((barcode.clone(), reason)),
        }
    }
    (valid, invalid)
}

// ============================================================================
// General Validations
// ============================================================================

/// Validate email format (basic check)
pub fn validate_email(email: &str) -> Result<(), &'static str> {
    if email.contains('@') && email.contains('.') && email.len() >= 5 {
        Ok(())
    } else {
        Err("Invalid email format")
    }
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), &'static str> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters");
    }
    Ok(())
}

/// Validate an http(s) link to a photo folder
pub fn validate_link(link: &str) -> Result<(), &'static str> {
    if link.starts_with("https://") || link.starts_with("http://") {
        Ok(())
    } else {
        Err("Link must start with http:// or https://")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_barcode_valid() {
        assert!(validate_barcode("4601234567890").is_ok());
        assert!(validate_barcode("123456").is_ok());
    }

    #[test]
    fn test_validate_barcode_invalid() {
        assert!(validate_barcode("12345").is_err());
        assert!(validate_barcode("46012345678AB").is_err());
        assert!(validate_barcode(&"1".repeat(33)).is_err());
    }

    #[test]
    fn test_normalize_barcodes() {
        let raw = vec![" 111111 ", "222222", "", "111111", "  "];
        assert_eq!(normalize_barcodes(&raw), vec!["111111", "222222"]);
    }

    #[test]
    fn test_partition_barcodes() {
        let list = vec!["123456".to_string(), "abc".to_string()];
        let (valid, invalid) = partition_barcodes(&list);
        assert_eq!(valid, vec!["123456".to_string()]);
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].0, "abc");
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("photo@studio.ru").is_ok());
        assert!(validate_email("nope").is_err());
    }

    #[test]
    fn test_validate_link() {
        assert!(validate_link("https://disk.example.com/folder/1").is_ok());
        assert!(validate_link("ftp://example.com").is_err());
    }

    mod properties {
        use crate::validation::{normalize_barcodes, partition_barcodes, validate_barcode};
        use proptest::prelude::*;

        proptest! {
            /// Every normalized barcode lands on exactly one side
            #[test]
            fn partition_splits_every_barcode(raw in prop::collection::vec("[0-9a-z ]{0,40}", 0..30)) {
                let normalized = normalize_barcodes(&raw);
                let (valid, invalid) = partition_barcodes(&normalized);
                prop_assert_eq!(valid.len() + invalid.len(), normalized.len());
                prop_assert!(valid.iter().all(|b| validate_barcode(b).is_ok()));
                prop_assert!(invalid.iter().all(|(b, _)| validate_barcode(b).is_err()));
            }

            /// Normalized barcodes carry no surrounding whitespace
            #[test]
            fn normalized_barcodes_are_trimmed(raw in prop::collection::vec("[ \\t]{0,2}[0-9]{1,12}[ \\t]{0,2}", 0..20)) {
                for barcode in normalize_barcodes(&raw) {
                    prop_assert_eq!(barcode.trim(), barcode.as_str());
                    prop_assert!(!barcode.is_empty());
                }
            }
        }
    }
}

