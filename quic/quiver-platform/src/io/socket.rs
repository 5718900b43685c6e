// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Non-blocking UDP socket wrapper.
//!
//! `EWOULDBLOCK` is surfaced as `Ok(None)` so the event loop can pause
//! and re-arm on readiness instead of treating backpressure as an error.

use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{SocketAddr, UdpSocket as StdUdpSocket},
    os::fd::{AsRawFd, RawFd},
};

#[derive(Debug)]
pub struct UdpSocket {
    inner: StdUdpSocket,
}

impl UdpSocket {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_nonblocking(true)?;
        socket.set_reuse_address(true)?;
        // multiple workers bind the same address, one socket each
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        // QUIC datagrams must never fragment
        #[cfg(target_os = "linux")]
        {
            use std::os::fd::AsRawFd as _;
            let value: libc::c_int = libc::IP_PMTUDISC_DO;
            unsafe {
                libc::setsockopt(
                    socket.as_raw_fd(),
                    libc::IPPROTO_IP,
                    libc::IP_MTU_DISCOVER,
                    &value as *const _ as *const libc::c_void,
                    core::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
            }
        }
        socket.bind(&addr.into())?;
        Ok(Self {
            inner: socket.into(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Sends one datagram; `Ok(None)` means the socket is backpressured
    pub fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> io::Result<Option<usize>> {
        match self.inner.send_to(datagram, addr) {
            Ok(len) => Ok(Some(len)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Receives one datagram; `Ok(None)` means nothing is queued
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inner.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(None),
            // a previous send to an unreachable peer can surface here;
            // not fatal for a UDP endpoint
            Err(error) if error.kind() == io::ErrorKind::ConnectionRefused => Ok(None),
            Err(error) => Err(error),
        }
    }
}

impl AsRawFd for UdpSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.as_raw_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_test() {
        let receiver = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = receiver.local_addr().unwrap();

        // nothing queued yet
        let mut buf = [0u8; 32];
        assert!(receiver.recv_from(&mut buf).unwrap().is_none());

        sender.send_to(b"datagram", addr).unwrap().unwrap();

        // give the loopback a moment
        for _ in 0..100 {
            if let Some((len, from)) = receiver.recv_from(&mut buf).unwrap() {
                assert_eq!(&buf[..len], b"datagram");
                assert_eq!(from, sender.local_addr().unwrap());
                return;
            }
            std::thread::sleep(core::time::Duration::from_millis(1));
        }
        panic!("datagram never arrived");
    }
}
