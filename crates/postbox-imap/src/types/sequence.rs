//! Sequence sets.

use std::fmt;

/// A set of message numbers (sequence numbers or UIDs) in wire form.
///
/// Consecutive runs are collapsed into `a:b` ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSet(Vec<(u32, u32)>);

impl SequenceSet {
    /// Builds a set from arbitrary numbers. Zeros are dropped and duplicates merged.
    #[must_use]
    pub fn from_numbers(numbers: &[u32]) -> Self {
        let mut sorted: Vec<u32> = numbers.iter().copied().filter(|&n| n > 0).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for n in sorted {
            match ranges.last_mut() {
                Some((_, end)) if *end + 1 == n => *end = n,
                _ => ranges.push((n, n)),
            }
        }
        Self(ranges)
    }

    /// A set holding one number.
    #[must_use]
    pub fn single(n: u32) -> Self {
        Self::from_numbers(&[n])
    }

    /// Returns true when the set selects nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SequenceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (start, end)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}:{end}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_collapse() {
        let set = SequenceSet::from_numbers(&[5, 1, 2, 3, 9, 3, 0]);
        assert_eq!(set.to_string(), "1:3,5,9");
    }

    #[test]
    fn test_empty() {
        assert!(SequenceSet::from_numbers(&[]).is_empty());
        assert_eq!(SequenceSet::single(4).to_string(), "4");
    }
}
