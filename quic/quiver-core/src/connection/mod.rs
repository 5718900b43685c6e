// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod id;

pub use id::ConnectionId;

use crate::{application::ApplicationErrorCode, transport};
use core::fmt;

/// Why a connection (or pending operation on it) terminated
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The connection was closed without an error
    Closed,
    /// The peer or the local transport closed the connection with an error
    Transport(transport::Error),
    /// The application closed the connection
    Application(ApplicationErrorCode),
    /// The idle timer expired; the connection dies silently
    IdleTimerExpired,
    /// A stateless reset from the peer was validated
    StatelessReset,
    /// The peer never produced a usable version
    UnsupportedVersion,
    /// The stream map is exhausted in the requested direction
    StreamLimitReached,
    /// The operation cannot complete until the send queue drains
    WouldBlock,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed"),
            Self::Transport(error) => write!(f, "transport error: {error}"),
            Self::Application(code) => write!(f, "application error: {code}"),
            Self::IdleTimerExpired => write!(f, "idle timer expired"),
            Self::StatelessReset => write!(f, "stateless reset received"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::StreamLimitReached => write!(f, "stream limit reached"),
            Self::WouldBlock => write!(f, "operation would block"),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}
