// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub mod driver;
pub mod socket;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod epoll;
        pub use epoll::Epoll as DefaultDriver;
    }
}

pub use driver::{Driver, Event, Interest, Wake};
pub use socket::UdpSocket;
