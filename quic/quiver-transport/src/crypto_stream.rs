// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::stream::send_buffer::{Chunk, SendBuffer};
use quiver_core::{frame, transport, varint::VarInt};
use std::collections::BTreeMap;

/// Bound on buffered out-of-order CRYPTO bytes per encryption level
//= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
//# If an endpoint does not expand its buffer, it MUST close the
//# connection with a CRYPTO_BUFFER_EXCEEDED error code.
pub const MAX_RX_BUFFER: usize = 64 * 1024;

/// The CRYPTO stream for one encryption level: offset-ordered reassembly
/// inbound, a retransmission-aware buffer outbound.
///
/// Levels are independent; discarding a level (Initial/Handshake after
/// the handshake confirms) drops the whole stream and its memory.
#[derive(Debug, Default)]
pub struct CryptoStream {
    rx_read_offset: u64,
    rx_segments: BTreeMap<u64, Vec<u8>>,
    tx: SendBuffer,
}

impl CryptoStream {
    /// Buffers a received CRYPTO frame
    pub fn on_crypto_frame(&mut self, frame: &frame::Crypto) -> Result<(), transport::Error> {
        let offset = frame.offset.as_u64();
        let end = offset + frame.data.len() as u64;

        if end <= self.rx_read_offset {
            return Ok(());
        }

        let buffered: usize = self.rx_segments.values().map(Vec::len).sum();
        if buffered + frame.data.len() > MAX_RX_BUFFER {
            return Err(transport::Error::CRYPTO_BUFFER_EXCEEDED);
        }

        // overlap handling mirrors stream reassembly: keep the first
        // copy of every byte
        let mut start = offset.max(self.rx_read_offset);
        if let Some((&prev_offset, prev)) = self.rx_segments.range(..=start).next_back() {
            let prev_end = prev_offset + prev.len() as u64;
            if prev_end >= end {
                return Ok(());
            }
            start = start.max(prev_end);
        }
        while let Some((&next_offset, next)) = self.rx_segments.range(start..).next() {
            if next_offset >= end {
                break;
            }
            let next_end = next_offset + next.len() as u64;
            if next_end <= end {
                self.rx_segments.remove(&next_offset);
            } else {
                let tail = next[(end - next_offset) as usize..].to_vec();
                self.rx_segments.remove(&next_offset);
                self.rx_segments.insert(end, tail);
                break;
            }
        }

        let slice = &frame.data[(start - offset) as usize..(end - offset) as usize];
        self.rx_segments.insert(start, slice.to_vec());
        Ok(())
    }

    /// Drains the contiguous prefix for delivery to the TLS session
    pub fn pop_received(&mut self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        while let Some((&offset, _)) = self.rx_segments.first_key_value() {
            if offset > self.rx_read_offset {
                break;
            }
            let (offset, segment) = self.rx_segments.pop_first().expect("peeked above");
            let skip = (self.rx_read_offset - offset) as usize;
            if skip < segment.len() {
                out.extend_from_slice(&segment[skip..]);
                self.rx_read_offset = offset + segment.len() as u64;
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Queues handshake bytes from the TLS session
    pub fn write(&mut self, bytes: &[u8]) {
        self.tx.push(bytes);
    }

    #[inline]
    pub fn has_transmission_interest(&self) -> bool {
        self.tx.has_retransmissions() || self.tx.untransmitted_len() > 0
    }

    /// Total bytes handed to the packetizer so far
    #[inline]
    pub fn bytes_transmitted(&self) -> u64 {
        self.tx.next_offset()
    }

    /// Pops the next CRYPTO frame payload that fits in `max_len`
    pub fn next_transmission(&mut self, max_len: usize) -> Option<(VarInt, Vec<u8>)> {
        let Chunk { offset, data } = self.tx.pop_chunk(max_len, usize::MAX)?;
        Some((VarInt::new(offset).expect("crypto offsets stay in range"), data))
    }

    pub fn on_ack(&mut self, offset: u64, len: u64) {
        self.tx.on_ack(offset, len);
    }

    pub fn on_loss(&mut self, offset: u64, len: u64) {
        self.tx.on_loss(offset, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crypto_frame(offset: u64, data: &'static [u8]) -> frame::Crypto<'static> {
        frame::Crypto {
            offset: VarInt::new(offset).unwrap(),
            data,
        }
    }

    #[test]
    fn reassembly_test() {
        let mut stream = CryptoStream::default();
        stream.on_crypto_frame(&crypto_frame(6, b"world")).unwrap();
        assert!(stream.pop_received().is_none());

        stream.on_crypto_frame(&crypto_frame(0, b"hello ")).unwrap();
        assert_eq!(stream.pop_received().unwrap(), b"hello world");

        // duplicates deliver nothing new
        stream.on_crypto_frame(&crypto_frame(0, b"hello ")).unwrap();
        assert!(stream.pop_received().is_none());
    }

    #[test]
    fn tx_retransmission_test() {
        let mut stream = CryptoStream::default();
        stream.write(b"client hello");

        let (offset, data) = stream.next_transmission(6).unwrap();
        assert_eq!((offset.as_u64(), data.as_slice()), (0, &b"client"[..]));

        stream.on_loss(0, 6);
        let (offset, data) = stream.next_transmission(100).unwrap();
        assert_eq!((offset.as_u64(), data.as_slice()), (0, &b"client"[..]));

        let (offset, data) = stream.next_transmission(100).unwrap();
        assert_eq!((offset.as_u64(), data.as_slice()), (6, &b" hello"[..]));

        stream.on_ack(0, 12);
        assert!(!stream.has_transmission_interest());
    }

    #[test]
    fn buffer_bound_test() {
        let mut stream = CryptoStream::default();
        let big = vec![0u8; MAX_RX_BUFFER];
        // out of order so it has to buffer
        let frame = frame::Crypto {
            offset: VarInt::from_u8(1),
            data: &big,
        };
        stream.on_crypto_frame(&frame).unwrap();

        let overflow = frame::Crypto {
            offset: VarInt::new(1 + big.len() as u64).unwrap(),
            data: b"x",
        };
        assert_eq!(
            stream.on_crypto_frame(&overflow).unwrap_err().code,
            transport::Error::CRYPTO_BUFFER_EXCEEDED.code
        );
    }
}
