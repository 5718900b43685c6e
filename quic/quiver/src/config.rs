// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use quiver_core::{
    recovery::congestion_controller::Algorithm,
    transport::parameters::{TransportParameters, MAX_ACK_DELAY_EXPONENT},
    varint::VarInt,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CongestionControl {
    #[default]
    Reno,
    Cubic,
}

/// Endpoint configuration (every option has a working default)
#[derive(Clone, Debug)]
pub struct Config {
    /// Milliseconds; 0 disables the idle timeout
    pub max_idle_timeout_ms: u64,
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    /// At most 20
    pub ack_delay_exponent: u8,
    pub max_ack_delay_ms: u64,
    /// At least 2
    pub active_connection_id_limit: u64,
    pub disable_active_migration: bool,
    pub congestion_control: CongestionControl,
    pub initial_rtt_ms: u64,
    /// Worker threads, each with its own socket and connection shard
    pub workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_idle_timeout_ms: 30_000,
            // roughly ten full datagrams per stream before a window
            // update is needed
            initial_max_data: 1_000_000,
            initial_max_stream_data_bidi_local: 12_000,
            initial_max_stream_data_bidi_remote: 12_000,
            initial_max_stream_data_uni: 12_000,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 100,
            ack_delay_exponent: 3,
            max_ack_delay_ms: 25,
            active_connection_id_limit: 4,
            disable_active_migration: false,
            congestion_control: CongestionControl::Reno,
            initial_rtt_ms: 333,
            workers: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigError(pub &'static str);

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ack_delay_exponent > MAX_ACK_DELAY_EXPONENT {
            return Err(ConfigError("ack_delay_exponent exceeds 20"));
        }
        if self.max_ack_delay_ms >= 1 << 14 {
            return Err(ConfigError("max_ack_delay exceeds 2^14 ms"));
        }
        if self.active_connection_id_limit < 2 {
            return Err(ConfigError("active_connection_id_limit below 2"));
        }
        if self.workers == 0 {
            return Err(ConfigError("at least one worker is required"));
        }
        Ok(())
    }

    pub(crate) fn transport_parameters(&self) -> TransportParameters {
        let varint = |value: u64| VarInt::new(value).unwrap_or(VarInt::MAX);
        TransportParameters {
            max_idle_timeout: varint(self.max_idle_timeout_ms),
            initial_max_data: varint(self.initial_max_data),
            initial_max_stream_data_bidi_local: varint(self.initial_max_stream_data_bidi_local),
            initial_max_stream_data_bidi_remote: varint(self.initial_max_stream_data_bidi_remote),
            initial_max_stream_data_uni: varint(self.initial_max_stream_data_uni),
            initial_max_streams_bidi: varint(self.initial_max_streams_bidi),
            initial_max_streams_uni: varint(self.initial_max_streams_uni),
            ack_delay_exponent: self.ack_delay_exponent,
            max_ack_delay: varint(self.max_ack_delay_ms),
            disable_active_migration: self.disable_active_migration,
            active_connection_id_limit: varint(self.active_connection_id_limit),
            ..Default::default()
        }
    }

    pub(crate) fn congestion_algorithm(&self) -> Algorithm {
        match self.congestion_control {
            CongestionControl::Reno => Algorithm::Reno,
            CongestionControl::Cubic => Algorithm::Cubic,
        }
    }

    pub(crate) fn initial_rtt(&self) -> Duration {
        Duration::from_millis(self.initial_rtt_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_test() {
        assert!(Config::default().validate().is_ok());

        let config = Config {
            ack_delay_exponent: 21,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            active_connection_id_limit: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parameters_test() {
        let parameters = Config::default().transport_parameters();
        assert_eq!(parameters.initial_max_data, VarInt::from_u32(1_000_000));
        parameters
            .validate(quiver_core::endpoint::Type::Server)
            .unwrap();
    }
}
