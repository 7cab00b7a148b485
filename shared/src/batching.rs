//! Splitting work items into request-sized batches

/// Number of full batches of `size` that fit into `n` items.
pub fn batch_count(n: usize, size: usize) -> usize {
    if size == 0 {
        0
    } else {
        n / size
    }
}

/// Split `items` into chunks of exactly `size`, dropping the remainder.
///
/// The dropped tail waits for the next run; a batch is never short.
pub fn full_batches<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    if size == 0 {
        return Vec::new();
    }
    items
        .chunks_exact(size)
        .map(|chunk| chunk.to_vec())
        .collect()
}

/// Split `items` into chunks of at most `size`; the last chunk may be short.
pub fn chunk_all<T: Clone>(items: &[T], size: usize) -> Vec<Vec<T>> {
    if size == 0 {
        return Vec::new();
    }
    items.chunks(size).map(|chunk| chunk.to_vec()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_below_batch_size() {
        let items: Vec<u32> = (0..9).collect();
        assert!(full_batches(&items, 10).is_empty());
        assert_eq!(batch_count(9, 10), 0);
    }

    #[test]
    fn remainder_is_left_over() {
        let items: Vec<u32> = (0..25).collect();
        let batches = full_batches(&items, 10);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1], (10..20).collect::<Vec<_>>());
    }

    #[test]
    fn chunk_all_keeps_short_tail() {
        let items: Vec<u32> = (0..25).collect();
        let chunks = chunk_all(&items, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn zero_size_yields_nothing() {
        assert!(full_batches(&[1, 2, 3], 0).is_empty());
        assert!(chunk_all(&[1, 2, 3], 0).is_empty());
        assert_eq!(batch_count(3, 0), 0);
    }
}
