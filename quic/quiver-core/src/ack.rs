// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Packet-number range sets.
//!
//! [`AckRanges`] backs both the receive path (recording which packet
//! numbers arrived, for ACK generation) and decoded ACK frames. Ranges
//! are kept ascending, inclusive, and coalesced on insert; ACK frames
//! iterate them in descending order as the wire format requires.

use crate::varint::VarInt;
use core::ops::RangeInclusive;

/// The default bound on tracked ranges; the lowest ranges are shed first
/// once the bound is hit, matching the ACK frame's own bias towards the
/// largest packet numbers.
pub const DEFAULT_RANGE_LIMIT: usize = 100;

#[derive(Clone, Debug)]
pub struct AckRanges {
    /// Ascending, non-adjacent, non-overlapping inclusive ranges
    ranges: Vec<(u64, u64)>,
    limit: usize,
}

// the range limit is a local memory bound, not part of the value
impl PartialEq for AckRanges {
    fn eq(&self, other: &Self) -> bool {
        self.ranges == other.ranges
    }
}

impl Eq for AckRanges {}

impl Default for AckRanges {
    fn default() -> Self {
        Self::new()
    }
}

impl AckRanges {
    #[inline]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_RANGE_LIMIT)
    }

    #[inline]
    pub fn with_limit(limit: usize) -> Self {
        debug_assert!(limit > 0);
        Self {
            ranges: Vec::new(),
            limit,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    #[inline]
    pub fn interval_len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn min_value(&self) -> Option<u64> {
        self.ranges.first().map(|(start, _)| *start)
    }

    #[inline]
    pub fn max_value(&self) -> Option<u64> {
        self.ranges.last().map(|(_, end)| *end)
    }

    #[inline]
    pub fn contains(&self, value: u64) -> bool {
        self.ranges
            .binary_search_by(|(start, end)| {
                if value < *start {
                    core::cmp::Ordering::Greater
                } else if value > *end {
                    core::cmp::Ordering::Less
                } else {
                    core::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Inserts a single value, coalescing with its neighbors.
    ///
    /// Returns `false` if the value was already present.
    #[inline]
    pub fn insert_value(&mut self, value: u64) -> bool {
        self.insert_range(value..=value)
    }

    /// Inserts an inclusive range, coalescing with overlapping or
    /// adjacent neighbors. Returns `false` if fully contained already.
    pub fn insert_range(&mut self, range: RangeInclusive<u64>) -> bool {
        let (start, end) = (*range.start(), *range.end());
        debug_assert!(start <= end);

        // find the first range which could merge with `start`
        // (its end is at least start - 1)
        let index = self
            .ranges
            .partition_point(|(_, e)| e.checked_add(1).is_some_and(|e| e < start));

        if let Some((s, e)) = self.ranges.get(index).copied() {
            if s <= start && end <= e {
                return false;
            }
            // extend over every range overlapping or adjacent to the input
            let merge_end = self
                .ranges
                .partition_point(|(s, _)| end.checked_add(1).is_some_and(|end| *s <= end));
            let new_start = s.min(start);
            let new_end = self.ranges[index..merge_end]
                .last()
                .map_or(end, |(_, e)| (*e).max(end));
            self.ranges.splice(index..merge_end, [(new_start, new_end)]);
        } else {
            self.ranges.push((start, end));
        }

        // shed the lowest ranges once over the limit
        while self.ranges.len() > self.limit {
            self.ranges.remove(0);
        }

        true
    }

    /// Drops every value strictly below `value`
    pub fn remove_below(&mut self, value: u64) {
        self.ranges.retain_mut(|(start, end)| {
            if *end < value {
                return false;
            }
            if *start < value {
                *start = value;
            }
            true
        });
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Ascending iteration
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = RangeInclusive<u64>> + '_ {
        self.ranges.iter().map(|(start, end)| *start..=*end)
    }

    /// Descending iteration, as ACK frames are laid out on the wire
    #[inline]
    pub fn iter_descending(&self) -> impl Iterator<Item = RangeInclusive<u64>> + '_ {
        self.ranges.iter().rev().map(|(start, end)| *start..=*end)
    }

    /// The number of values contained across all ranges
    pub fn value_count(&self) -> u64 {
        self.ranges
            .iter()
            .map(|(start, end)| end - start + 1)
            .sum()
    }
}

impl FromIterator<RangeInclusive<u64>> for AckRanges {
    fn from_iter<T: IntoIterator<Item = RangeInclusive<u64>>>(iter: T) -> Self {
        let mut ranges = Self::new();
        for range in iter {
            ranges.insert_range(range);
        }
        ranges
    }
}

/// ACK delay scaling
//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# ACK Delay:  A variable-length integer encoding the acknowledgment
//#    delay in microseconds; see Section 13.2.5.  It is decoded by
//#    multiplying the value in the field by 2 to the power of the
//#    ack_delay_exponent transport parameter sent by the sender of the
//#    ACK frame.
#[inline]
pub fn scale_ack_delay(micros: u64, ack_delay_exponent: u8) -> VarInt {
    VarInt::new(micros >> ack_delay_exponent).unwrap_or(VarInt::MAX)
}

#[inline]
pub fn unscale_ack_delay(value: VarInt, ack_delay_exponent: u8) -> core::time::Duration {
    let micros = value
        .as_u64()
        .checked_shl(ack_delay_exponent as u32)
        .unwrap_or(u64::MAX);
    core::time::Duration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(ranges: &AckRanges) -> Vec<(u64, u64)> {
        ranges.iter().map(|r| (*r.start(), *r.end())).collect()
    }

    #[test]
    fn insert_coalesce_test() {
        let mut ranges = AckRanges::new();
        assert!(ranges.insert_value(5));
        assert!(ranges.insert_value(7));
        assert_eq!(collect(&ranges), vec![(5, 5), (7, 7)]);

        // adjacent values merge
        assert!(ranges.insert_value(6));
        assert_eq!(collect(&ranges), vec![(5, 7)]);

        // duplicates are reported
        assert!(!ranges.insert_value(6));

        assert!(ranges.insert_range(0..=2));
        assert!(ranges.insert_range(2..=5));
        assert_eq!(collect(&ranges), vec![(0, 7)]);
    }

    #[test]
    fn overlap_spanning_test() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(0..=1);
        ranges.insert_range(4..=5);
        ranges.insert_range(8..=9);
        ranges.insert_range(3..=8);
        assert_eq!(collect(&ranges), vec![(0, 1), (3, 9)]);
        assert_eq!(ranges.value_count(), 9);
    }

    #[test]
    fn remove_below_test() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(0..=3);
        ranges.insert_range(6..=9);
        ranges.remove_below(2);
        assert_eq!(collect(&ranges), vec![(2, 3), (6, 9)]);
        ranges.remove_below(6);
        assert_eq!(collect(&ranges), vec![(6, 9)]);
    }

    #[test]
    fn limit_sheds_lowest_test() {
        let mut ranges = AckRanges::with_limit(2);
        ranges.insert_value(0);
        ranges.insert_value(10);
        ranges.insert_value(20);
        assert_eq!(collect(&ranges), vec![(10, 10), (20, 20)]);
        // the shed range no longer reports as contained
        assert!(!ranges.contains(0));
    }

    #[test]
    fn descending_test() {
        let mut ranges = AckRanges::new();
        ranges.insert_range(1..=2);
        ranges.insert_range(7..=9);
        let descending: Vec<_> = ranges.iter_descending().collect();
        assert_eq!(descending, vec![7..=9, 1..=2]);
    }
}
