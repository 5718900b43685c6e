// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::ConnectionId,
    packet::{Header, FIXED_BIT},
};
use quiver_codec::DecoderError;

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
//# 1-RTT Packet {
//#   Header Form (1) = 0,
//#   Fixed Bit (1) = 1,
//#   Spin Bit (1),
//#   Reserved Bits (2),
//#   Key Phase (1),
//#   Packet Number Length (2),
//#   Destination Connection ID (0..160),
//#   Packet Number (8..32),
//#   Packet Payload (8..),
//# }

/// Short headers do not encode the connection ID length; it comes from
/// the registry of locally-issued IDs.
pub(super) fn parse(
    datagram: &[u8],
    short_dcid_len: usize,
) -> Result<(Header, usize), DecoderError> {
    let first = *datagram.first().ok_or(DecoderError::UnexpectedEof(1))?;

    if first & FIXED_BIT != FIXED_BIT {
        return Err(DecoderError::InvariantViolation("fixed bit is zero"));
    }

    let dcid_end = 1usize
        .checked_add(short_dcid_len)
        .filter(|end| *end <= datagram.len())
        .ok_or(DecoderError::UnexpectedEof(short_dcid_len))?;

    let destination_cid = ConnectionId::try_from_slice(&datagram[1..dcid_end])
        .map_err(|_| DecoderError::InvariantViolation("invalid connection id"))?;

    let header = Header::Short {
        destination_cid,
        pn_offset: dcid_end,
    };

    // a short-header packet consumes the rest of the datagram
    Ok((header, datagram.len()))
}
