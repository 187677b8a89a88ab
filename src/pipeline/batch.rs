//! Batch planning: fixed-size chunks of the page sequence.
//!
//! Pure and lazy. Each [`Batch`] borrows its slice and carries the 1-based
//! batch number and the total so prompts can tell the model where it is.

/// One chunk of the page sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch<'a, T> {
    /// 1-based.
    pub batch_num: usize,
    pub total_batches: usize,
    pub pages: &'a [T],
}

/// Number of batches needed for `len` items. A zero size is treated as one.
pub fn total_batches(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size.max(1))
}

/// Split `pages` into batches of `batch_size` (the last may be shorter).
pub fn plan_batches<T>(pages: &[T], batch_size: usize) -> impl Iterator<Item = Batch<'_, T>> + '_ {
    let size = batch_size.max(1);
    let total = total_batches(pages.len(), size);
    pages.chunks(size).enumerate().map(move |(i, chunk)| Batch {
        batch_num: i + 1,
        total_batches: total,
        pages: chunk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn twenty_five_by_ten() {
        let pages: Vec<usize> = (0..25).collect();
        let batches: Vec<_> = plan_batches(&pages, 10).collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches.iter().map(|b| b.pages.len()).collect::<Vec<_>>(),
            vec![10, 10, 5]
        );
        assert_eq!(
            batches.iter().map(|b| b.batch_num).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(batches.iter().all(|b| b.total_batches == 3));
        assert_eq!(batches[2].pages[0], 20);
    }

    #[test]
    fn empty_input_has_no_batches() {
        let pages: Vec<u8> = Vec::new();
        assert_eq!(plan_batches(&pages, 10).count(), 0);
        assert_eq!(total_batches(0, 10), 0);
    }

    #[test]
    fn restartable() {
        let pages: Vec<usize> = (0..7).collect();
        let a: Vec<_> = plan_batches(&pages, 3).collect();
        let b: Vec<_> = plan_batches(&pages, 3).collect();
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn batches_partition_the_input(len in 0usize..200, size in 1usize..30) {
            let pages: Vec<usize> = (0..len).collect();
            let batches: Vec<_> = plan_batches(&pages, size).collect();
            prop_assert_eq!(batches.len(), total_batches(len, size));
            let flat: Vec<usize> = batches.iter().flat_map(|b| b.pages.iter().copied()).collect();
            prop_assert_eq!(flat, pages.clone());
            for (i, b) in batches.iter().enumerate() {
                prop_assert_eq!(b.batch_num, i + 1);
                prop_assert_eq!(b.total_batches, batches.len());
                prop_assert!(!b.pages.is_empty() && b.pages.len() <= size);
            }
        }
    }
}
