//! A set of content sums.

use std::collections::HashSet;
use tably_storage::Sum;

/// Set of sums keyed by their raw bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SumSet(HashSet<Sum>);

impl SumSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sum, returning true if it was not present.
    pub fn insert(&mut self, sum: Sum) -> bool {
        self.0.insert(sum)
    }

    /// Removes a sum, returning true if it was present.
    pub fn remove(&mut self, sum: &Sum) -> bool {
        self.0.remove(sum)
    }

    /// Returns true if the set contains `sum`.
    pub fn contains(&self, sum: &Sum) -> bool {
        self.0.contains(sum)
    }

    /// Adds every sum in `other`.
    pub fn extend_from(&mut self, other: &SumSet) {
        self.0.extend(other.0.iter().copied());
    }

    /// Number of sums in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over the sums in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &Sum> {
        self.0.iter()
    }

    /// Returns the sums in ascending byte order.
    pub fn to_sorted_vec(&self) -> Vec<Sum> {
        let mut sums: Vec<Sum> = self.0.iter().copied().collect();
        sums.sort();
        sums
    }
}

impl FromIterator<Sum> for SumSet {
    fn from_iter<I: IntoIterator<Item = Sum>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Sum> for SumSet {
    fn extend<I: IntoIterator<Item = Sum>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

impl IntoIterator for SumSet {
    type Item = Sum;
    type IntoIter = std::collections::hash_set::IntoIter<Sum>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut set = SumSet::new();
        let a = Sum::compute(b"a");
        assert!(set.insert(a));
        assert!(!set.insert(a));
        assert!(set.contains(&a));
        assert!(set.remove(&a));
        assert!(set.is_empty());
    }

    #[test]
    fn test_sorted_vec() {
        let set: SumSet = [3u8, 1, 2]
            .iter()
            .map(|&n| Sum::from_bytes([n; 16]))
            .collect();
        assert_eq!(
            set.to_sorted_vec(),
            vec![
                Sum::from_bytes([1; 16]),
                Sum::from_bytes([2; 16]),
                Sum::from_bytes([3; 16]),
            ]
        );
    }
}
