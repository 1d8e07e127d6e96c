//! Available-space list bucketing.
//!
//! `NUM_AVAIL_LISTS` free-lists per data file, bucketed by the page's total
//! `FREE` (contiguous free area plus holes) as a fraction of the page's
//! data-area capacity. List 0 is the smallest-free bucket, the last list
//! the largest (`>= 1/2` of capacity).

use crate::types::NUM_AVAIL_LISTS;

/// Fraction-of-capacity threshold for bucket `i` (`i` counted from 0):
/// list 0 needs `>= 1/8`, list 1 `>= 2/8`, ... up to `>= N/8`.
fn threshold(i: usize, capacity: usize) -> usize {
    (capacity * (i + 1)) / (2 * NUM_AVAIL_LISTS)
}

/// Which available-space bucket a page with `free` bytes (out of
/// `capacity`) belongs on, if any. Returns the *largest* bucket index whose
/// threshold `free` still satisfies: the page is inserted into the bucket
/// whose range contains its new `FREE`.
pub fn bucket_for(free: usize, capacity: usize) -> Option<u8> {
    (0..NUM_AVAIL_LISTS)
        .rev()
        .find(|&i| free >= threshold(i, capacity))
        .map(|i| i as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_page_lands_in_top_bucket() {
        assert_eq!(bucket_for(4000, 4000), Some((NUM_AVAIL_LISTS - 1) as u8));
    }

    #[test]
    fn tiny_free_space_has_no_bucket() {
        assert_eq!(bucket_for(10, 4000), None);
    }

    #[test]
    fn buckets_are_monotonic_in_free_space() {
        let cap = 4000;
        let mut last = None;
        for free in (0..=cap).step_by(200) {
            let b = bucket_for(free, cap);
            if let (Some(prev), Some(cur)) = (last, b) {
                assert!(cur >= prev);
            }
            last = b.or(last);
        }
    }
}
