// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    stream::send_buffer::{Chunk, SendBuffer},
    sync::OutgoingFlowController,
};
use quiver_core::{
    application::ApplicationErrorCode,
    stream::{state::Sender, StreamError},
    varint::VarInt,
};

/// Cap on buffered-but-unsent bytes per stream before writes push back
pub const DEFAULT_SEND_QUEUE_CAP: usize = 256 * 1024;

/// A chunk of stream data scheduled into a packet
#[derive(Debug, PartialEq, Eq)]
pub struct Transmission {
    pub offset: u64,
    pub data: Vec<u8>,
    pub is_fin: bool,
}

/// The sending half of a stream.
#[derive(Debug)]
pub struct SendStream {
    state: Sender,
    flow: OutgoingFlowController,
    buffer: SendBuffer,
    /// Offset at which FIN applies, once the application closed
    fin_offset: Option<u64>,
    fin_transmitted: bool,
    fin_acked: bool,
    /// A FIN that was transmitted and declared lost
    fin_lost: bool,
    /// RESET_STREAM pending transmission: (code, final_size)
    pending_reset: Option<(ApplicationErrorCode, VarInt)>,
    send_queue_cap: usize,
}

impl SendStream {
    pub fn new(initial_limit: VarInt) -> Self {
        Self {
            state: Sender::default(),
            flow: OutgoingFlowController::new(initial_limit),
            buffer: SendBuffer::default(),
            fin_offset: None,
            fin_transmitted: false,
            fin_acked: false,
            fin_lost: false,
            pending_reset: None,
            send_queue_cap: DEFAULT_SEND_QUEUE_CAP,
        }
    }

    #[inline]
    pub fn state(&self) -> &Sender {
        &self.state
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Queues application data, returning the number of bytes accepted.
    ///
    /// Fails with `WouldBlock` when the send queue is at capacity;
    /// partial writes are allowed otherwise.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, StreamError> {
        if self.pending_reset.is_some() || self.state.is_reset_queued() || self.state.is_reset_sent()
        {
            return Err(StreamError::Broken);
        }
        if self.fin_offset.is_some() || self.state.is_terminal() {
            return Err(StreamError::Finished);
        }

        let room = self.send_queue_cap.saturating_sub(self.buffer.buffered_len());
        if room == 0 && !data.is_empty() {
            return Err(StreamError::WouldBlock);
        }
        let accepted = data.len().min(room);
        self.buffer.push(&data[..accepted]);
        let _ = self.state.on_send_stream();
        Ok(accepted)
    }

    /// Queues the FIN after all buffered data
    pub fn finish(&mut self) {
        if self.fin_offset.is_none() && self.pending_reset.is_none() && !self.state.is_terminal() {
            self.fin_offset = Some(self.buffer.end_offset());
            let _ = self.state.on_send_fin();
        }
    }

    /// Abandons the stream with an application error
    pub fn reset(&mut self, code: ApplicationErrorCode) {
        if self.state.on_queue_reset().is_err() {
            return;
        }
        let final_size = VarInt::new(self.buffer.next_offset()).unwrap_or(VarInt::MAX);
        self.pending_reset = Some((code, final_size));
        self.buffer.clear();
        self.fin_offset = None;
        self.fin_transmitted = false;
        self.fin_lost = false;
    }

    /// The peer asked us to stop sending; respond with RESET_STREAM
    //= https://www.rfc-editor.org/rfc/rfc9000#section-3.5
    //# An endpoint that receives a STOP_SENDING frame MUST send a
    //# RESET_STREAM frame if the stream is in the "Ready" or "Send" state.
    pub fn on_stop_sending(&mut self, code: ApplicationErrorCode) {
        self.reset(code);
    }

    /// Takes the RESET_STREAM frame to transmit, if one is pending
    pub fn take_pending_reset(&mut self) -> Option<(ApplicationErrorCode, VarInt)> {
        let pending = self.pending_reset.take();
        if pending.is_some() {
            let _ = self.state.on_send_reset();
        }
        pending
    }

    /// Re-queues a RESET_STREAM whose packet was lost
    pub fn on_reset_loss(&mut self, code: ApplicationErrorCode, final_size: VarInt) {
        if self.state.is_reset_sent() && !self.state.is_terminal() {
            self.pending_reset = Some((code, final_size));
        }
    }

    pub fn on_reset_ack(&mut self) {
        let _ = self.state.on_recv_reset_ack();
    }

    /// `true` if the stream has something to put on the wire
    pub fn has_transmission_interest(&self) -> bool {
        if self.pending_reset.is_some() {
            return true;
        }
        if self.state.is_reset_sent() || self.state.is_terminal() {
            return false;
        }
        self.buffer.has_retransmissions()
            || self.fin_lost
            || (self.buffer.untransmitted_len() > 0 && !self.flow.is_blocked())
            || self.unsent_fin()
    }

    fn unsent_fin(&self) -> bool {
        matches!(
            self.fin_offset,
            Some(offset)
                if self.buffer.next_offset() == offset && !self.fin_transmitted && !self.fin_acked
        )
    }

    /// Pops the next STREAM transmission, respecting the stream window
    /// and `max_connection_credit` (connection-level window available to
    /// this chunk). Returns the chunk and the connection credit consumed.
    pub fn next_transmission(
        &mut self,
        max_len: usize,
        max_connection_credit: usize,
    ) -> Option<(Transmission, usize)> {
        if self.state.is_reset_queued() || self.state.is_reset_sent() || self.state.is_terminal() {
            return None;
        }

        // retransmissions re-send bytes below the committed limit, so
        // they consume neither stream nor connection credit
        let retransmission = self.buffer.has_retransmissions();
        let new_credit = if retransmission {
            usize::MAX
        } else {
            let stream_credit = self.flow.available().min(usize::MAX as u64) as usize;
            stream_credit.min(max_connection_credit)
        };

        let chunk = self.buffer.pop_chunk(max_len, new_credit);

        let (offset, data, consumed) = match chunk {
            Some(Chunk { offset, data }) => {
                let consumed = if retransmission {
                    0
                } else {
                    self.flow.acquire(data.len())
                };
                (offset, data, consumed)
            }
            None if self.fin_lost || (self.unsent_fin() && max_len > 0) => {
                // empty frame carrying only the FIN
                (self.buffer.next_offset(), Vec::new(), 0)
            }
            None => return None,
        };

        let is_fin = match self.fin_offset {
            Some(fin_offset) => offset + data.len() as u64 == fin_offset,
            None => false,
        };
        if is_fin {
            self.fin_transmitted = true;
            self.fin_lost = false;
        }

        Some((
            Transmission {
                offset,
                data,
                is_fin,
            },
            consumed,
        ))
    }

    /// The limit to carry in a STREAM_DATA_BLOCKED frame, deduplicated
    pub fn blocked_frame(&mut self) -> Option<VarInt> {
        if self.buffer.untransmitted_len() == 0 {
            return None;
        }
        self.flow.blocked_frame()
    }

    pub fn on_max_stream_data(&mut self, limit: VarInt) -> bool {
        self.flow.on_max_data(limit)
    }

    /// A STREAM transmission was acknowledged
    pub fn on_ack(&mut self, offset: u64, len: u64, is_fin: bool) {
        self.buffer.on_ack(offset, len);
        if is_fin {
            self.fin_acked = true;
            self.fin_lost = false;
        }
        if self.fin_acked {
            if let Some(fin_offset) = self.fin_offset {
                if self.buffer.is_fully_acked(fin_offset) {
                    let _ = self.state.on_recv_all_acks();
                }
            }
        }
    }

    /// A STREAM transmission was declared lost
    pub fn on_loss(&mut self, offset: u64, len: u64, is_fin: bool) {
        if self.state.is_reset_sent() || self.state.is_terminal() {
            return;
        }
        self.buffer.on_loss(offset, len);
        if is_fin && !self.fin_acked {
            self.fin_lost = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unlimited() -> SendStream {
        SendStream::new(VarInt::MAX)
    }

    #[test]
    fn write_chunk_fin_test() {
        let mut stream = unlimited();
        assert_eq!(stream.write(b"hello").unwrap(), 5);
        stream.finish();

        let (first, _) = stream.next_transmission(3, usize::MAX).unwrap();
        assert_eq!((first.offset, first.is_fin), (0, false));
        assert_eq!(first.data, b"hel");

        let (second, _) = stream.next_transmission(100, usize::MAX).unwrap();
        assert_eq!((second.offset, second.is_fin), (3, true));
        assert_eq!(second.data, b"lo");

        assert!(stream.next_transmission(100, usize::MAX).is_none());

        stream.on_ack(0, 5, true);
        assert!(stream.is_finished());
    }

    #[test]
    fn fin_only_frame_test() {
        let mut stream = unlimited();
        stream.write(b"data").unwrap();
        let (chunk, _) = stream.next_transmission(100, usize::MAX).unwrap();
        assert!(!chunk.is_fin);

        // fin arrives after the data already went out
        stream.finish();
        let (fin, _) = stream.next_transmission(100, usize::MAX).unwrap();
        assert_eq!((fin.offset, fin.data.len(), fin.is_fin), (4, 0, true));
    }

    #[test]
    fn flow_control_gating_test() {
        let mut stream = SendStream::new(VarInt::from_u8(4));
        stream.write(b"abcdef").unwrap();

        let (chunk, consumed) = stream.next_transmission(100, usize::MAX).unwrap();
        assert_eq!(chunk.data, b"abcd");
        assert_eq!(consumed, 4);

        // blocked on the stream window
        assert!(stream.next_transmission(100, usize::MAX).is_none());
        assert_eq!(stream.blocked_frame(), Some(VarInt::from_u8(4)));
        assert_eq!(stream.blocked_frame(), None);

        assert!(stream.on_max_stream_data(VarInt::from_u8(6)));
        let (chunk, consumed) = stream.next_transmission(100, usize::MAX).unwrap();
        assert_eq!(chunk.data, b"ef");
        assert_eq!(consumed, 2);
    }

    #[test]
    fn connection_credit_gating_test() {
        let mut stream = unlimited();
        stream.write(b"abcdef").unwrap();

        let (chunk, consumed) = stream.next_transmission(100, 2).unwrap();
        assert_eq!(chunk.data, b"ab");
        assert_eq!(consumed, 2);
    }

    #[test]
    fn retransmission_consumes_no_credit_test() {
        let mut stream = SendStream::new(VarInt::from_u8(4));
        stream.write(b"abcd").unwrap();
        stream.next_transmission(100, usize::MAX).unwrap();

        stream.on_loss(0, 4, false);
        // window is exhausted but the retransmission still goes out
        let (chunk, consumed) = stream.next_transmission(100, 0).unwrap();
        assert_eq!(chunk.data, b"abcd");
        assert_eq!(consumed, 0);
    }

    #[test]
    fn reset_test() {
        let mut stream = unlimited();
        stream.write(b"abcd").unwrap();
        stream.next_transmission(100, usize::MAX).unwrap();

        stream.reset(9u32.into());
        assert!(stream.has_transmission_interest());
        let (code, final_size) = stream.take_pending_reset().unwrap();
        assert_eq!(code, 9u32.into());
        assert_eq!(final_size, VarInt::from_u8(4));

        // no data goes out after a reset
        assert!(stream.next_transmission(100, usize::MAX).is_none());
        assert_eq!(stream.write(b"x"), Err(StreamError::Broken));

        stream.on_reset_ack();
        assert!(stream.is_finished());
    }

    #[test]
    fn lost_fin_retransmission_test() {
        let mut stream = unlimited();
        stream.write(b"ab").unwrap();
        stream.finish();
        let (chunk, _) = stream.next_transmission(100, usize::MAX).unwrap();
        assert!(chunk.is_fin);

        stream.on_loss(0, 2, true);
        let (retransmission, _) = stream.next_transmission(100, usize::MAX).unwrap();
        assert_eq!(retransmission.data, b"ab");
        assert!(retransmission.is_fin);
    }
}
