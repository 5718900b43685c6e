// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quiver_core::ack::AckRanges;

/// A retransmission-aware outgoing byte buffer, shared by stream data
/// and CRYPTO data.
///
/// Bytes are retained from the lowest unacknowledged offset until every
/// byte below them is acknowledged; lost ranges are re-queued and take
/// priority over new data.
#[derive(Debug, Default)]
pub struct SendBuffer {
    /// Offset of `data[0]` in the stream
    base: u64,
    data: Vec<u8>,
    /// Next never-before-transmitted offset
    next_offset: u64,
    /// Acknowledged byte ranges at or above `base`
    acked: AckRanges,
    /// Lost ranges awaiting retransmission, ascending, disjoint
    lost: Vec<(u64, u64)>,
}

/// One frame's worth of data handed to the packet assembler
#[derive(Debug, PartialEq, Eq)]
pub struct Chunk {
    pub offset: u64,
    pub data: Vec<u8>,
}

impl SendBuffer {
    /// Total bytes accepted so far (the stream's current write offset)
    #[inline]
    pub fn end_offset(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    /// The next offset that has never been transmitted
    #[inline]
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    #[inline]
    pub fn buffered_len(&self) -> usize {
        self.data.len()
    }

    /// Bytes queued but not yet transmitted for the first time
    #[inline]
    pub fn untransmitted_len(&self) -> u64 {
        self.end_offset() - self.next_offset
    }

    #[inline]
    pub fn has_retransmissions(&self) -> bool {
        !self.lost.is_empty()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Pops the next chunk to transmit: retransmissions first, then up
    /// to `max_new_len` new bytes, each chunk at most `max_len` long.
    pub fn pop_chunk(&mut self, max_len: usize, max_new_len: usize) -> Option<Chunk> {
        if max_len == 0 {
            return None;
        }

        if let Some((offset, len)) = self.lost.first().copied() {
            let take = len.min(max_len as u64);
            let chunk = self.copy_range(offset, take);
            if take == len {
                self.lost.remove(0);
            } else {
                self.lost[0] = (offset + take, len - take);
            }
            return Some(chunk);
        }

        let available = self.untransmitted_len().min(max_new_len as u64);
        if available == 0 {
            return None;
        }
        let take = available.min(max_len as u64);
        let chunk = self.copy_range(self.next_offset, take);
        self.next_offset += take;
        Some(chunk)
    }

    fn copy_range(&self, offset: u64, len: u64) -> Chunk {
        let start = (offset - self.base) as usize;
        let end = start + len as usize;
        Chunk {
            offset,
            data: self.data[start..end].to_vec(),
        }
    }

    /// Records an acknowledged range and drops data which is no longer
    /// needed. Duplicate acknowledgments are no-ops.
    pub fn on_ack(&mut self, offset: u64, len: u64) {
        if len > 0 {
            self.acked.insert_range(offset..=offset + len - 1);
        }

        // a range that was marked lost and then acked by a late packet
        // no longer needs retransmission
        self.lost.retain_mut(|(lost_offset, lost_len)| {
            let lost_end = *lost_offset + *lost_len;
            if offset <= *lost_offset && lost_end <= offset + len {
                return false;
            }
            // partial overlaps keep the unacked part (front or tail)
            if offset <= *lost_offset && *lost_offset < offset + len {
                let acked = offset + len - *lost_offset;
                *lost_offset += acked;
                *lost_len -= acked;
            } else if *lost_offset < offset && offset < lost_end {
                *lost_len = offset - *lost_offset;
            }
            *lost_len > 0
        });

        // release the acknowledged prefix
        if let Some(min) = self.acked.min_value() {
            if min <= self.base {
                let release_to = self
                    .acked
                    .iter()
                    .next()
                    .map(|range| *range.end() + 1)
                    .unwrap_or(self.base);
                if release_to > self.base {
                    let drop_len = (release_to - self.base).min(self.data.len() as u64);
                    self.data.drain(..drop_len as usize);
                    self.base += drop_len;
                    self.acked.remove_below(self.base);
                }
            }
        }
    }

    /// Re-queues a transmitted range for retransmission, skipping any
    /// parts that were acknowledged in the meantime
    pub fn on_loss(&mut self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let mut pending = vec![(offset, len)];
        while let Some((offset, len)) = pending.pop() {
            let end = offset + len;
            if offset < self.base {
                if end <= self.base {
                    continue;
                }
                pending.push((self.base, end - self.base));
                continue;
            }
            // split around acked sub-ranges
            let mut start = offset;
            let acked_ranges: Vec<(u64, u64)> =
                self.acked.iter().map(|r| (*r.start(), *r.end())).collect();
            for (acked_start, acked_end) in acked_ranges {
                let (acked_start, acked_end) = (acked_start, acked_end + 1);
                if acked_end <= start || acked_start >= end {
                    continue;
                }
                if acked_start > start {
                    self.queue_lost(start, acked_start - start);
                }
                start = start.max(acked_end);
            }
            if start < end {
                self.queue_lost(start, end - start);
            }
        }
    }

    fn queue_lost(&mut self, offset: u64, len: u64) {
        let mut start = offset;
        let mut end = offset + len;
        // a range may already be queued if the original and a
        // retransmission were both declared lost; merge instead of
        // duplicating the bytes on the wire
        let mut index = self
            .lost
            .partition_point(|(lost_offset, lost_len)| lost_offset + lost_len < start);
        while index < self.lost.len() && self.lost[index].0 <= end {
            start = start.min(self.lost[index].0);
            end = end.max(self.lost[index].0 + self.lost[index].1);
            self.lost.remove(index);
        }
        self.lost.insert(index, (start, end - start));
    }

    /// `true` once every byte below `final_offset` is acknowledged.
    ///
    /// `on_ack` releases the acknowledged prefix and advances `base`, so
    /// the check reduces to the base having caught up.
    pub fn is_fully_acked(&self, final_offset: u64) -> bool {
        self.base >= final_offset
    }

    /// Drops everything; used when the stream resets
    pub fn clear(&mut self) {
        self.data.clear();
        self.lost.clear();
        self.acked.clear();
        self.base = self.end_offset().max(self.next_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_data_chunking_test() {
        let mut buffer = SendBuffer::default();
        buffer.push(b"hello world");

        let chunk = buffer.pop_chunk(5, usize::MAX).unwrap();
        assert_eq!(chunk.offset, 0);
        assert_eq!(chunk.data, b"hello");

        // flow control caps new bytes
        let chunk = buffer.pop_chunk(100, 3).unwrap();
        assert_eq!(chunk.offset, 5);
        assert_eq!(chunk.data, b" wo");

        let chunk = buffer.pop_chunk(100, 100).unwrap();
        assert_eq!(chunk.offset, 8);
        assert_eq!(chunk.data, b"rld");

        assert!(buffer.pop_chunk(100, 100).is_none());
    }

    #[test]
    fn ack_releases_prefix_test() {
        let mut buffer = SendBuffer::default();
        buffer.push(&[1; 100]);
        buffer.pop_chunk(100, 100).unwrap();

        buffer.on_ack(50, 50);
        assert_eq!(buffer.buffered_len(), 100);

        buffer.on_ack(0, 50);
        assert_eq!(buffer.buffered_len(), 0);
        assert!(buffer.is_fully_acked(100));
    }

    #[test]
    fn loss_requeues_test() {
        let mut buffer = SendBuffer::default();
        buffer.push(&[7; 30]);
        buffer.pop_chunk(30, 30).unwrap();

        buffer.on_loss(0, 30);
        assert!(buffer.has_retransmissions());

        let chunk = buffer.pop_chunk(10, 0).unwrap();
        assert_eq!(chunk.offset, 0);
        assert_eq!(chunk.data.len(), 10);

        // a late ack for part of the lost range trims it
        buffer.on_ack(10, 10);
        let chunk = buffer.pop_chunk(30, 0).unwrap();
        assert_eq!(chunk.offset, 20);
        assert_eq!(chunk.data.len(), 10);
        assert!(buffer.pop_chunk(30, 0).is_none());
    }

    #[test]
    fn loss_skips_acked_middle_test() {
        let mut buffer = SendBuffer::default();
        buffer.push(&[7; 30]);
        buffer.pop_chunk(30, 30).unwrap();

        buffer.on_ack(10, 10);
        buffer.on_loss(0, 30);

        let first = buffer.pop_chunk(30, 0).unwrap();
        let second = buffer.pop_chunk(30, 0).unwrap();
        assert_eq!((first.offset, first.data.len()), (0, 10));
        assert_eq!((second.offset, second.data.len()), (20, 10));
    }
}
