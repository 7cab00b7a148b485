//! Batching and barcode intake tests
//!
//! Tests for request sizing:
//! - retouch batches are always exactly full, floor(n / size) of them
//! - bulk photo requests cover every barcode, only the last one short
//! - scanned barcode lists are cleaned before any batching happens

use proptest::prelude::*;
use shared::{batch_count, chunk_all, full_batches, normalize_barcodes, partition_barcodes};

// ============================================================================
// Property Test Strategies
// ============================================================================

/// Generate a scanned barcode (digits, 6-14 long)
fn barcode_strategy() -> impl Strategy<Value = String> {
    "[0-9]{6,14}"
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Property: full_batches yields floor(n / size) batches of exactly size
    #[test]
    fn test_full_batches_are_exact(n in 0usize..200, size in 1usize..25) {
        let items: Vec<usize> = (0..n).collect();
        let batches = full_batches(&items, size);

        prop_assert_eq!(batches.len(), n / size);
        prop_assert_eq!(batches.len(), batch_count(n, size));
        prop_assert!(batches.iter().all(|b| b.len() == size));
    }

    /// Property: batched items keep their order and never repeat
    #[test]
    fn test_full_batches_preserve_order(n in 0usize..200, size in 1usize..25) {
        let items: Vec<usize> = (0..n).collect();
        let flat: Vec<usize> = full_batches(&items, size).into_iter().flatten().collect();

        prop_assert_eq!(&flat[..], &items[..flat.len()]);
        prop_assert_eq!(n - flat.len(), n % size);
    }

    /// Property: chunk_all covers every item; only the last chunk may be short
    #[test]
    fn test_chunk_all_covers_everything(n in 1usize..200, size in 1usize..25) {
        let items: Vec<usize> = (0..n).collect();
        let chunks = chunk_all(&items, size);

        prop_assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), n);
        prop_assert_eq!(chunks.len(), (n + size - 1) / size);
        let (last, rest) = chunks.split_last().unwrap();
        prop_assert!(rest.iter().all(|c| c.len() == size));
        prop_assert!(!last.is_empty() && last.len() <= size);
    }

    /// Property: normalization is idempotent and duplicate-free
    #[test]
    fn test_normalize_is_idempotent(raw in prop::collection::vec(barcode_strategy(), 0..40)) {
        let once = normalize_barcodes(&raw);
        let twice = normalize_barcodes(&once);
        prop_assert_eq!(&once, &twice);

        let mut sorted = once.clone();
        sorted.sort();
        sorted.dedup();
        prop_assert_eq!(sorted.len(), once.len());
    }

    /// Property: digit barcodes of legal length always validate
    #[test]
    fn test_generated_barcodes_validate(raw in prop::collection::vec(barcode_strategy(), 1..20)) {
        let (valid, invalid) = partition_barcodes(&raw);
        prop_assert!(invalid.is_empty());
        prop_assert_eq!(valid.len(), raw.len());
    }
}

// ============================================================================
// Unit Tests: Retouch Batch Sizing
// ============================================================================

#[cfg(test)]
mod retouch_batch_tests {
    use super::*;

    const BATCH: usize = 10;

    #[test]
    fn test_nine_ready_lines_create_nothing() {
        assert_eq!(batch_count(9, BATCH), 0);
    }

    #[test]
    fn test_twenty_five_ready_lines_create_two() {
        let lines: Vec<u32> = (0..25).collect();
        let batches = full_batches(&lines, BATCH);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0], 0);
        assert_eq!(batches[1][9], 19);
    }

    #[test]
    fn test_exact_multiple_leaves_nothing_over() {
        let lines: Vec<u32> = (0..30).collect();
        assert_eq!(full_batches(&lines, BATCH).len(), 3);
    }
}

// ============================================================================
// Unit Tests: Barcode Intake
// ============================================================================

#[cfg(test)]
mod barcode_intake_tests {
    use super::*;

    #[test]
    fn test_scanner_noise_is_dropped() {
        let raw = vec!["4601234567890\r", " 4601234567890", "", "123"];
        let cleaned = normalize_barcodes(&raw);
        assert_eq!(cleaned, vec!["4601234567890".to_string(), "123".to_string()]);

        let (valid, invalid) = partition_barcodes(&cleaned);
        assert_eq!(valid, vec!["4601234567890".to_string()]);
        assert_eq!(invalid[0].0, "123");
    }

    #[test]
    fn test_bulk_request_chunks() {
        let barcodes: Vec<String> = (0..45).map(|i| format!("{:08}", i)).collect();
        let chunks = chunk_all(&barcodes, 20);
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![20, 20, 5]);
    }
}
