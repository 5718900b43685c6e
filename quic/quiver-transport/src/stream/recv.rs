// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::sync::IncomingFlowController;
use quiver_core::{
    application::ApplicationErrorCode,
    frame,
    stream::{state::Receiver, StreamError},
    transport,
    varint::VarInt,
};
use std::collections::BTreeMap;

/// The receiving half of a stream: reassembly, flow accounting, and the
/// receiver state machine.
#[derive(Debug)]
pub struct ReceiveStream {
    state: Receiver,
    flow: IncomingFlowController,
    /// Everything below this offset has been handed to the application
    read_offset: u64,
    /// Out-of-order segments keyed by start offset; disjoint after
    /// overlap trimming on insert
    segments: BTreeMap<u64, Vec<u8>>,
    final_size: Option<u64>,
    /// Highest offset seen, for connection flow accounting and final
    /// size validation
    highest_received: u64,
    reset_code: Option<ApplicationErrorCode>,
    /// STOP_SENDING requested by the application, pending transmission
    pending_stop_sending: Option<ApplicationErrorCode>,
}

impl ReceiveStream {
    pub fn new(initial_limit: VarInt) -> Self {
        Self {
            state: Receiver::default(),
            flow: IncomingFlowController::new(initial_limit),
            read_offset: 0,
            segments: BTreeMap::new(),
            final_size: None,
            highest_received: 0,
            reset_code: None,
            pending_stop_sending: None,
        }
    }

    #[inline]
    pub fn state(&self) -> &Receiver {
        &self.state
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies a STREAM frame. Returns the number of newly accounted
    /// connection-flow bytes (the advance of the highest offset).
    pub fn on_stream_frame(&mut self, frame: &frame::Stream) -> Result<u64, transport::Error> {
        if self.state.is_reset_received() || self.state.is_terminal() {
            // late data for an abandoned stream carries no obligations
            return Ok(0);
        }

        let offset = frame.offset.as_u64();
        let end = offset + frame.data.len() as u64;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
        //# Once a final size for a stream is known, it cannot change.  If a
        //# RESET_STREAM or STREAM frame is received indicating a change in the
        //# final size for the stream, an endpoint SHOULD respond with an error
        //# of type FINAL_SIZE_ERROR
        if let Some(final_size) = self.final_size {
            if end > final_size || (frame.is_fin && end != final_size) {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
        }
        if frame.is_fin {
            if end < self.highest_received {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
            self.final_size = Some(end);
            let _ = self.state.on_recv_fin();
        }

        // stream-level flow control
        self.flow.on_data(VarInt::new(end).map_err(|_| {
            transport::Error::FLOW_CONTROL_ERROR.with_reason("stream offset overflow")
        })?)?;

        let newly_received = end.saturating_sub(self.highest_received);
        self.highest_received = self.highest_received.max(end);

        if !frame.data.is_empty() {
            self.insert(offset, frame.data);
        }

        if let Some(final_size) = self.final_size {
            if self.contiguous_end() == final_size && self.state.is_size_known() {
                let _ = self.state.on_recv_all_data();
            }
        }

        Ok(newly_received)
    }

    /// Applies a RESET_STREAM frame. Returns newly accounted
    /// connection-flow bytes (a reset commits the final size).
    pub fn on_reset(&mut self, frame: &frame::ResetStream) -> Result<u64, transport::Error> {
        let final_size = frame.final_size.as_u64();

        if final_size < self.highest_received {
            return Err(transport::Error::FINAL_SIZE_ERROR);
        }
        if let Some(known) = self.final_size {
            if known != final_size {
                return Err(transport::Error::FINAL_SIZE_ERROR);
            }
        }

        self.flow.on_data(frame.final_size)?;
        let newly_received = final_size.saturating_sub(self.highest_received);
        self.highest_received = final_size;
        self.final_size = Some(final_size);

        if self.state.on_recv_reset().is_ok() {
            self.reset_code = Some(frame.application_error_code);
            self.segments.clear();
        }

        Ok(newly_received)
    }

    /// Reads contiguous bytes into `buf`
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if let Some(code) = self.reset_code {
            let _ = self.state.on_app_read_reset();
            return Err(StreamError::Reset(code));
        }

        let mut copied = 0;
        while copied < buf.len() {
            let Some((&offset, segment)) = self.segments.first_key_value() else {
                break;
            };
            if offset > self.read_offset {
                break;
            }

            let skip = (self.read_offset - offset) as usize;
            let available = &segment[skip..];
            let take = available.len().min(buf.len() - copied);
            buf[copied..copied + take].copy_from_slice(&available[..take]);
            copied += take;
            self.read_offset += take as u64;

            if skip + take == segment.len() {
                self.segments.pop_first();
            }
        }

        if copied == 0 {
            if self.at_fin() {
                let _ = self.state.on_app_read_all_data();
                return Err(StreamError::Finished);
            }
            return Ok(0);
        }

        Ok(copied)
    }

    /// The flow-control window release for bytes the app consumed;
    /// returns the new stream limit, if it advanced
    pub fn release_window(&mut self) -> Option<VarInt> {
        if self.final_size.is_some() {
            // no further MAX_STREAM_DATA once the size is final
            return None;
        }
        self.flow.release()
    }

    /// The stream limit to carry in a MAX_STREAM_DATA frame, once per
    /// advance
    pub fn window_announcement(&mut self) -> Option<VarInt> {
        if self.final_size.is_some() {
            return None;
        }
        self.flow.announce()
    }

    /// Forces the limit to be advertised again after a lost frame
    pub fn reannounce_window(&mut self) {
        self.flow.reannounce();
    }

    /// Application asks the peer to stop sending
    pub fn stop_sending(&mut self, code: ApplicationErrorCode) {
        if !self.state.is_terminal() && !self.state.is_reset_received() {
            self.pending_stop_sending = Some(code);
        }
    }

    pub fn take_pending_stop_sending(&mut self) -> Option<ApplicationErrorCode> {
        self.pending_stop_sending.take()
    }

    /// Bytes available for reading right now
    pub fn readable_len(&self) -> usize {
        (self.contiguous_end() - self.read_offset) as usize
    }

    fn at_fin(&self) -> bool {
        matches!(self.final_size, Some(final_size) if self.read_offset == final_size)
    }

    /// End of the contiguous prefix starting at `read_offset`
    fn contiguous_end(&self) -> u64 {
        let mut end = self.read_offset;
        for (&offset, segment) in &self.segments {
            if offset > end {
                break;
            }
            end = end.max(offset + segment.len() as u64);
        }
        end
    }

    /// Inserts a segment, trimming against delivered data and existing
    /// segments; duplicates and overlaps are accepted
    fn insert(&mut self, offset: u64, data: &[u8]) {
        let mut start = offset;
        let mut end = offset + data.len() as u64;

        if end <= self.read_offset {
            return;
        }
        start = start.max(self.read_offset);

        // trim against the predecessor
        if let Some((&prev_offset, prev)) = self.segments.range(..=start).next_back() {
            let prev_end = prev_offset + prev.len() as u64;
            if prev_end >= end {
                return;
            }
            start = start.max(prev_end);
        }

        // absorb or trim successors
        while let Some((&next_offset, next)) = self.segments.range(start..).next() {
            if next_offset >= end {
                break;
            }
            let next_end = next_offset + next.len() as u64;
            if next_end <= end {
                self.segments.remove(&next_offset);
            } else {
                // keep the non-overlapping tail of the existing segment
                let tail = next[(end - next_offset) as usize..].to_vec();
                self.segments.remove(&next_offset);
                self.segments.insert(end, tail);
                break;
            }
        }

        let slice = &data[(start - offset) as usize..(end - offset) as usize];
        self.segments.insert(start, slice.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_frame(offset: u64, data: &'static [u8], fin: bool) -> frame::Stream<'static> {
        frame::Stream {
            stream_id: VarInt::ZERO,
            offset: VarInt::new(offset).unwrap(),
            is_last_frame: false,
            is_fin: fin,
            data,
        }
    }

    #[test]
    fn out_of_order_reassembly_test() {
        let mut stream = ReceiveStream::new(VarInt::from_u16(1000));
        let mut buf = [0u8; 16];

        stream.on_stream_frame(&stream_frame(5, b"World", false)).unwrap();
        // nothing readable until the gap is filled
        assert_eq!(stream.read(&mut buf).unwrap(), 0);

        stream.on_stream_frame(&stream_frame(0, b"Hello", false)).unwrap();
        let len = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"HelloWorld");

        stream.on_stream_frame(&stream_frame(10, b"!", true)).unwrap();
        let len = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"!");

        assert_eq!(stream.read(&mut buf), Err(StreamError::Finished));
        assert!(stream.is_finished());
    }

    #[test]
    fn duplicate_and_overlap_test() {
        let mut stream = ReceiveStream::new(VarInt::from_u16(1000));
        let mut buf = [0u8; 16];

        stream.on_stream_frame(&stream_frame(0, b"abcd", false)).unwrap();
        stream.on_stream_frame(&stream_frame(2, b"cdef", false)).unwrap();
        stream.on_stream_frame(&stream_frame(0, b"abcd", false)).unwrap();

        let len = stream.read(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"abcdef");
    }

    #[test]
    fn final_size_violation_test() {
        let mut stream = ReceiveStream::new(VarInt::from_u16(1000));
        stream.on_stream_frame(&stream_frame(0, b"done", true)).unwrap();

        // data past the final size is fatal
        assert_eq!(
            stream.on_stream_frame(&stream_frame(4, b"x", false)),
            Err(transport::Error::FINAL_SIZE_ERROR)
        );

        // moving the fin is fatal
        assert_eq!(
            stream.on_stream_frame(&stream_frame(0, b"don", true)),
            Err(transport::Error::FINAL_SIZE_ERROR)
        );
    }

    #[test]
    fn stream_flow_control_test() {
        let mut stream = ReceiveStream::new(VarInt::from_u8(4));
        assert!(stream.on_stream_frame(&stream_frame(0, b"abcde", false)).is_err());
    }

    #[test]
    fn reset_test() {
        let mut stream = ReceiveStream::new(VarInt::from_u16(1000));
        stream.on_stream_frame(&stream_frame(0, b"abc", false)).unwrap();

        let newly = stream
            .on_reset(&frame::ResetStream {
                stream_id: VarInt::ZERO,
                application_error_code: 7u32.into(),
                final_size: VarInt::from_u8(10),
            })
            .unwrap();
        assert_eq!(newly, 7);

        let mut buf = [0u8; 4];
        assert_eq!(
            stream.read(&mut buf),
            Err(StreamError::Reset(7u32.into()))
        );
        assert!(stream.is_finished());
    }

    #[test]
    fn connection_flow_accounting_test() {
        let mut stream = ReceiveStream::new(VarInt::from_u16(1000));
        assert_eq!(
            stream.on_stream_frame(&stream_frame(0, b"abcd", false)).unwrap(),
            4
        );
        // a retransmission adds nothing
        assert_eq!(
            stream.on_stream_frame(&stream_frame(0, b"abcd", false)).unwrap(),
            0
        );
        // only the advance past the previous highest counts
        assert_eq!(
            stream.on_stream_frame(&stream_frame(2, b"cdef", false)).unwrap(),
            2
        );
    }
}
