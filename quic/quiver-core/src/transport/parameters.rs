// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The quic_transport_parameters TLS extension (RFC 9000 §18).

use crate::{
    connection::ConnectionId, endpoint, stateless_reset, transport::Error, varint::VarInt,
};
use quiver_codec::{
    DecoderBuffer, DecoderBufferResult, DecoderValue, Encoder, EncoderBuffer, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# original_destination_connection_id (0x00)
const ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
const MAX_IDLE_TIMEOUT: u64 = 0x01;
const STATELESS_RESET_TOKEN: u64 = 0x02;
const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
const INITIAL_MAX_DATA: u64 = 0x04;
const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
const ACK_DELAY_EXPONENT: u64 = 0x0a;
const MAX_ACK_DELAY: u64 = 0x0b;
const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
const PREFERRED_ADDRESS: u64 = 0x0d;
const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
const RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;

pub const DEFAULT_MAX_UDP_PAYLOAD_SIZE: u64 = 65_527;
pub const DEFAULT_ACK_DELAY_EXPONENT: u8 = 3;
pub const MAX_ACK_DELAY_EXPONENT: u8 = 20;
pub const DEFAULT_MAX_ACK_DELAY_MS: u64 = 25;
pub const DEFAULT_ACTIVE_CONNECTION_ID_LIMIT: u64 = 2;
pub const MIN_MAX_UDP_PAYLOAD_SIZE: u64 = 1200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportParameters {
    /// Server only; echoes the DCID of the client's first Initial
    pub original_destination_connection_id: Option<ConnectionId>,
    /// Milliseconds; zero disables the idle timeout
    pub max_idle_timeout: VarInt,
    /// Server only
    pub stateless_reset_token: Option<stateless_reset::Token>,
    pub max_udp_payload_size: VarInt,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub ack_delay_exponent: u8,
    /// Milliseconds
    pub max_ack_delay: VarInt,
    pub disable_active_migration: bool,
    /// Server only; carried opaquely, this endpoint does not use it
    pub preferred_address: Option<Vec<u8>>,
    pub active_connection_id_limit: VarInt,
    pub initial_source_connection_id: Option<ConnectionId>,
    /// Server only; present after a Retry
    pub retry_source_connection_id: Option<ConnectionId>,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: VarInt::ZERO,
            stateless_reset_token: None,
            max_udp_payload_size: VarInt::new(DEFAULT_MAX_UDP_PAYLOAD_SIZE).unwrap(),
            initial_max_data: VarInt::ZERO,
            initial_max_stream_data_bidi_local: VarInt::ZERO,
            initial_max_stream_data_bidi_remote: VarInt::ZERO,
            initial_max_stream_data_uni: VarInt::ZERO,
            initial_max_streams_bidi: VarInt::ZERO,
            initial_max_streams_uni: VarInt::ZERO,
            ack_delay_exponent: DEFAULT_ACK_DELAY_EXPONENT,
            max_ack_delay: VarInt::new(DEFAULT_MAX_ACK_DELAY_MS).unwrap(),
            disable_active_migration: false,
            preferred_address: None,
            active_connection_id_limit: VarInt::new(DEFAULT_ACTIVE_CONNECTION_ID_LIMIT).unwrap(),
            initial_source_connection_id: None,
            retry_source_connection_id: None,
        }
    }
}

impl TransportParameters {
    /// Validates parameters received from `sender`
    pub fn validate(&self, sender: endpoint::Type) -> Result<(), Error> {
        let error = |reason| Err(Error::TRANSPORT_PARAMETER_ERROR.with_reason(reason));

        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.1
        //# A client MUST NOT include any server-only transport parameter:
        //# original_destination_connection_id, preferred_address,
        //# retry_source_connection_id, or stateless_reset_token.
        if sender.is_client() {
            if self.original_destination_connection_id.is_some() {
                return error("client sent original_destination_connection_id");
            }
            if self.stateless_reset_token.is_some() {
                return error("client sent stateless_reset_token");
            }
            if self.preferred_address.is_some() {
                return error("client sent preferred_address");
            }
            if self.retry_source_connection_id.is_some() {
                return error("client sent retry_source_connection_id");
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values above 20 are invalid.
        if self.ack_delay_exponent > MAX_ACK_DELAY_EXPONENT {
            return error("ack_delay_exponent exceeds 20");
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values of 2^14 or greater are invalid.
        if self.max_ack_delay >= 1u64 << 14 {
            return error("max_ack_delay exceeds 2^14");
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# Values below 1200 are invalid.
        if self.max_udp_payload_size < MIN_MAX_UDP_PAYLOAD_SIZE {
            return error("max_udp_payload_size below 1200");
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
        //# The value of the active_connection_id_limit parameter MUST be at
        //# least 2.
        if self.active_connection_id_limit < DEFAULT_ACTIVE_CONNECTION_ID_LIMIT {
            return error("active_connection_id_limit below 2");
        }

        if self.initial_max_streams_bidi > 1u64 << 60 || self.initial_max_streams_uni > 1u64 << 60
        {
            return error("initial max streams exceeds 2^60");
        }

        Ok(())
    }

    pub fn max_idle_timeout(&self) -> Option<core::time::Duration> {
        if self.max_idle_timeout == 0u64 {
            None
        } else {
            Some(core::time::Duration::from_millis(
                self.max_idle_timeout.as_u64(),
            ))
        }
    }

    pub fn max_ack_delay(&self) -> core::time::Duration {
        core::time::Duration::from_millis(self.max_ack_delay.as_u64())
    }

    /// Encodes to the wire format for the TLS extension
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let len = self.encoding_size();
        let mut storage = vec![0u8; len];
        let mut encoder = EncoderBuffer::new(&mut storage);
        self.encode(&mut encoder);
        storage
    }
}

fn encode_varint_param<E: Encoder>(encoder: &mut E, id: u64, value: VarInt) {
    encoder.encode(&VarInt::new(id).unwrap());
    encoder.encode(&VarInt::try_from(value.encoding_size()).unwrap());
    encoder.encode(&value);
}

fn encode_bytes_param<E: Encoder>(encoder: &mut E, id: u64, value: &[u8]) {
    encoder.encode(&VarInt::new(id).unwrap());
    encoder.encode(&VarInt::try_from(value.len()).unwrap());
    encoder.write_slice(value);
}

impl EncoderValue for TransportParameters {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        if let Some(cid) = &self.original_destination_connection_id {
            encode_bytes_param(encoder, ORIGINAL_DESTINATION_CONNECTION_ID, cid.as_bytes());
        }
        if self.max_idle_timeout != 0u64 {
            encode_varint_param(encoder, MAX_IDLE_TIMEOUT, self.max_idle_timeout);
        }
        if let Some(token) = &self.stateless_reset_token {
            encode_bytes_param(encoder, STATELESS_RESET_TOKEN, token.as_bytes());
        }
        if self.max_udp_payload_size != DEFAULT_MAX_UDP_PAYLOAD_SIZE {
            encode_varint_param(encoder, MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size);
        }
        if self.initial_max_data != 0u64 {
            encode_varint_param(encoder, INITIAL_MAX_DATA, self.initial_max_data);
        }
        if self.initial_max_stream_data_bidi_local != 0u64 {
            encode_varint_param(
                encoder,
                INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
                self.initial_max_stream_data_bidi_local,
            );
        }
        if self.initial_max_stream_data_bidi_remote != 0u64 {
            encode_varint_param(
                encoder,
                INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
                self.initial_max_stream_data_bidi_remote,
            );
        }
        if self.initial_max_stream_data_uni != 0u64 {
            encode_varint_param(
                encoder,
                INITIAL_MAX_STREAM_DATA_UNI,
                self.initial_max_stream_data_uni,
            );
        }
        if self.initial_max_streams_bidi != 0u64 {
            encode_varint_param(encoder, INITIAL_MAX_STREAMS_BIDI, self.initial_max_streams_bidi);
        }
        if self.initial_max_streams_uni != 0u64 {
            encode_varint_param(encoder, INITIAL_MAX_STREAMS_UNI, self.initial_max_streams_uni);
        }
        if self.ack_delay_exponent != DEFAULT_ACK_DELAY_EXPONENT {
            encode_varint_param(
                encoder,
                ACK_DELAY_EXPONENT,
                VarInt::from_u8(self.ack_delay_exponent),
            );
        }
        if self.max_ack_delay != DEFAULT_MAX_ACK_DELAY_MS {
            encode_varint_param(encoder, MAX_ACK_DELAY, self.max_ack_delay);
        }
        if self.disable_active_migration {
            encode_bytes_param(encoder, DISABLE_ACTIVE_MIGRATION, &[]);
        }
        if let Some(blob) = &self.preferred_address {
            encode_bytes_param(encoder, PREFERRED_ADDRESS, blob);
        }
        if self.active_connection_id_limit != DEFAULT_ACTIVE_CONNECTION_ID_LIMIT {
            encode_varint_param(
                encoder,
                ACTIVE_CONNECTION_ID_LIMIT,
                self.active_connection_id_limit,
            );
        }
        if let Some(cid) = &self.initial_source_connection_id {
            encode_bytes_param(encoder, INITIAL_SOURCE_CONNECTION_ID, cid.as_bytes());
        }
        if let Some(cid) = &self.retry_source_connection_id {
            encode_bytes_param(encoder, RETRY_SOURCE_CONNECTION_ID, cid.as_bytes());
        }
    }
}

impl<'a> DecoderValue<'a> for TransportParameters {
    fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        use quiver_codec::DecoderError::InvariantViolation;

        let mut parameters = Self::default();
        let mut seen = [false; 17];
        let mut buffer = buffer;

        while !buffer.is_empty() {
            let (id, remaining) = buffer.decode::<VarInt>()?;
            let (value, remaining) = remaining.decode_slice_with_len_prefix::<VarInt>()?;
            buffer = remaining;
            let value = value.into_less_safe_slice();

            let id = id.as_u64();
            if let Some(flag) = seen.get_mut(id as usize) {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4
                //# An endpoint MUST NOT send a parameter more than once in a given
                //# transport parameters extension.  An endpoint SHOULD treat receipt
                //# of duplicate transport parameters as a connection error of type
                //# TRANSPORT_PARAMETER_ERROR.
                if *flag {
                    return Err(InvariantViolation("duplicate transport parameter"));
                }
                *flag = true;
            }

            let varint_value = || -> Result<VarInt, quiver_codec::DecoderError> {
                let (value, remaining) = DecoderBuffer::new(value).decode::<VarInt>()?;
                remaining.ensure_empty()?;
                Ok(value)
            };
            let cid_value = || {
                ConnectionId::try_from_slice(value)
                    .map_err(|_| InvariantViolation("invalid connection id parameter"))
            };

            match id {
                ORIGINAL_DESTINATION_CONNECTION_ID => {
                    parameters.original_destination_connection_id = Some(cid_value()?);
                }
                MAX_IDLE_TIMEOUT => parameters.max_idle_timeout = varint_value()?,
                STATELESS_RESET_TOKEN => {
                    parameters.stateless_reset_token = Some(
                        stateless_reset::Token::try_from(value)
                            .map_err(|_| InvariantViolation("invalid stateless reset token"))?,
                    );
                }
                MAX_UDP_PAYLOAD_SIZE => parameters.max_udp_payload_size = varint_value()?,
                INITIAL_MAX_DATA => parameters.initial_max_data = varint_value()?,
                INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    parameters.initial_max_stream_data_bidi_local = varint_value()?;
                }
                INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    parameters.initial_max_stream_data_bidi_remote = varint_value()?;
                }
                INITIAL_MAX_STREAM_DATA_UNI => {
                    parameters.initial_max_stream_data_uni = varint_value()?;
                }
                INITIAL_MAX_STREAMS_BIDI => {
                    parameters.initial_max_streams_bidi = varint_value()?;
                }
                INITIAL_MAX_STREAMS_UNI => parameters.initial_max_streams_uni = varint_value()?,
                ACK_DELAY_EXPONENT => {
                    let value = varint_value()?;
                    parameters.ack_delay_exponent =
                        u8::try_from(value.as_u64()).map_err(|_| {
                            InvariantViolation("ack_delay_exponent out of range")
                        })?;
                }
                MAX_ACK_DELAY => parameters.max_ack_delay = varint_value()?,
                DISABLE_ACTIVE_MIGRATION => {
                    if !value.is_empty() {
                        return Err(InvariantViolation(
                            "disable_active_migration carries a value",
                        ));
                    }
                    parameters.disable_active_migration = true;
                }
                PREFERRED_ADDRESS => parameters.preferred_address = Some(value.to_vec()),
                ACTIVE_CONNECTION_ID_LIMIT => {
                    parameters.active_connection_id_limit = varint_value()?;
                }
                INITIAL_SOURCE_CONNECTION_ID => {
                    parameters.initial_source_connection_id = Some(cid_value()?);
                }
                RETRY_SOURCE_CONNECTION_ID => {
                    parameters.retry_source_connection_id = Some(cid_value()?);
                }
                //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4.2
                //# An endpoint MUST ignore transport parameters that it does
                //# not support.
                _ => {}
            }
        }

        Ok((parameters, buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(parameters: &TransportParameters) -> TransportParameters {
        let bytes = parameters.encode_to_vec();
        let (decoded, remaining) = DecoderBuffer::new(&bytes)
            .decode::<TransportParameters>()
            .unwrap();
        assert!(remaining.is_empty());
        decoded
    }

    #[test]
    fn default_round_trip_test() {
        let parameters = TransportParameters::default();
        // all defaults encode to nothing
        assert!(parameters.encode_to_vec().is_empty());
        assert_eq!(round_trip(&parameters), parameters);
    }

    #[test]
    fn full_round_trip_test() {
        let parameters = TransportParameters {
            original_destination_connection_id: Some(
                ConnectionId::try_from_slice(&[1, 2, 3, 4]).unwrap(),
            ),
            max_idle_timeout: VarInt::from_u32(30_000),
            stateless_reset_token: Some(stateless_reset::Token::new([7; 16])),
            max_udp_payload_size: VarInt::from_u16(1472),
            initial_max_data: VarInt::from_u32(1_000_000),
            initial_max_stream_data_bidi_local: VarInt::from_u32(100_000),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(100_000),
            initial_max_stream_data_uni: VarInt::from_u32(50_000),
            initial_max_streams_bidi: VarInt::from_u8(100),
            initial_max_streams_uni: VarInt::from_u8(10),
            ack_delay_exponent: 4,
            max_ack_delay: VarInt::from_u8(30),
            disable_active_migration: true,
            preferred_address: None,
            active_connection_id_limit: VarInt::from_u8(4),
            initial_source_connection_id: Some(ConnectionId::try_from_slice(&[9; 8]).unwrap()),
            retry_source_connection_id: None,
        };
        assert_eq!(round_trip(&parameters), parameters);
        parameters.validate(crate::endpoint::Type::Server).unwrap();
    }

    #[test]
    fn client_forbidden_params_test() {
        let parameters = TransportParameters {
            stateless_reset_token: Some(stateless_reset::Token::new([7; 16])),
            ..Default::default()
        };
        assert!(parameters.validate(crate::endpoint::Type::Client).is_err());
        assert!(parameters.validate(crate::endpoint::Type::Server).is_ok());
    }

    #[test]
    fn range_validation_test() {
        let parameters = TransportParameters {
            ack_delay_exponent: 21,
            ..Default::default()
        };
        assert!(parameters.validate(crate::endpoint::Type::Server).is_err());

        let parameters = TransportParameters {
            max_udp_payload_size: VarInt::from_u16(1100),
            ..Default::default()
        };
        assert!(parameters.validate(crate::endpoint::Type::Server).is_err());

        let parameters = TransportParameters {
            active_connection_id_limit: VarInt::from_u8(1),
            ..Default::default()
        };
        assert!(parameters.validate(crate::endpoint::Type::Server).is_err());
    }

    #[test]
    fn duplicate_param_test() {
        let mut bytes = Vec::new();
        for _ in 0..2 {
            // max_idle_timeout = 1000, twice
            bytes.extend_from_slice(&[0x01, 0x02, 0x43, 0xe8]);
        }
        assert!(DecoderBuffer::new(&bytes)
            .decode::<TransportParameters>()
            .is_err());
    }

    #[test]
    fn unknown_param_ignored_test() {
        // a grease parameter followed by max_idle_timeout
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&[0x40, 0xff, 0x01, 0xab]);
        bytes.extend_from_slice(&[0x01, 0x02, 0x43, 0xe8]);
        let (parameters, _) = DecoderBuffer::new(&bytes)
            .decode::<TransportParameters>()
            .unwrap();
        assert_eq!(parameters.max_idle_timeout, VarInt::from_u16(1000));
    }
}
