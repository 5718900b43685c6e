// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The platform event-notification contract.
//!
//! One driver instance belongs to one event loop thread. Every call is
//! single-threaded except [`Wake::wake`], which any thread may use to
//! interrupt a blocked [`Driver::wait`].

use std::{io, os::fd::RawFd, time::Duration};

/// Readiness interest registered for a file descriptor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    ReadWrite,
}

impl Interest {
    #[inline]
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Readable | Self::ReadWrite)
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        matches!(self, Self::Writable | Self::ReadWrite)
    }
}

/// One readiness notification
#[derive(Clone, Copy, Debug, Default)]
pub struct Event {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub closed: bool,
}

/// A thread-safe handle that interrupts a blocked `wait`
pub trait Wake: Send + Sync {
    fn wake(&self);
}

/// The event driver owned by a single event loop
pub trait Driver {
    type Waker: Wake + Clone + 'static;

    fn add_fd(&mut self, fd: RawFd, interest: Interest, token: usize) -> io::Result<()>;

    fn modify_fd(&mut self, fd: RawFd, interest: Interest, token: usize) -> io::Result<()>;

    fn remove_fd(&mut self, fd: RawFd) -> io::Result<()>;

    /// Blocks until readiness, timeout, or a wake. Appends events to
    /// `events` and returns how many were delivered.
    fn wait(&mut self, timeout: Option<Duration>, events: &mut Vec<Event>) -> io::Result<usize>;

    /// A handle other threads use to interrupt `wait`
    fn waker(&self) -> Self::Waker;
}
