//! Key comparators for the B+Tree. Keys are opaque byte strings; an index is
//! created with the comparator that defines their total order.

use std::cmp::Ordering;

/// Compares two binary keys.
pub type KeyComparator = fn(&[u8], &[u8]) -> Ordering;

/// Lexicographic byte order.
pub fn default_comparator(a: &[u8], b: &[u8]) -> Ordering {
    a.cmp(b)
}
