// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! epoll-backed event driver with a self-pipe wake.

use crate::io::driver::{Driver, Event, Interest, Wake};
use std::{io, os::fd::RawFd, sync::Arc, time::Duration};

/// Token reserved for the wake pipe; never reported to callers
const WAKE_TOKEN: u64 = u64::MAX;

pub struct Epoll {
    epoll_fd: RawFd,
    wake_read: RawFd,
    waker: PipeWaker,
}

#[derive(Clone)]
pub struct PipeWaker {
    write_fd: Arc<WakeFd>,
}

struct WakeFd(RawFd);

impl Drop for WakeFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

impl Wake for PipeWaker {
    fn wake(&self) {
        let byte = 1u8;
        unsafe {
            // a full pipe already guarantees a pending wake
            libc::write(self.write_fd.0, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

fn interest_bits(interest: Interest) -> u32 {
    let mut bits = 0;
    if interest.is_readable() {
        bits |= libc::EPOLLIN as u32;
    }
    if interest.is_writable() {
        bits |= libc::EPOLLOUT as u32;
    }
    bits
}

fn last_error() -> io::Error {
    io::Error::last_os_error()
}

impl Epoll {
    pub fn new() -> io::Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epoll_fd < 0 {
            return Err(last_error());
        }

        let mut pipe_fds = [0 as RawFd; 2];
        let rc = unsafe {
            libc::pipe2(
                pipe_fds.as_mut_ptr(),
                libc::O_NONBLOCK | libc::O_CLOEXEC,
            )
        };
        if rc < 0 {
            let error = last_error();
            unsafe { libc::close(epoll_fd) };
            return Err(error);
        }
        let [wake_read, wake_write] = pipe_fds;

        let mut driver = Self {
            epoll_fd,
            wake_read,
            waker: PipeWaker {
                write_fd: Arc::new(WakeFd(wake_write)),
            },
        };
        driver.ctl(libc::EPOLL_CTL_ADD, wake_read, libc::EPOLLIN as u32, WAKE_TOKEN)?;
        Ok(driver)
    }

    fn ctl(&mut self, op: libc::c_int, fd: RawFd, events: u32, token: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: token,
        };
        let rc = unsafe { libc::epoll_ctl(self.epoll_fd, op, fd, &mut event) };
        if rc < 0 {
            return Err(last_error());
        }
        Ok(())
    }

    fn drain_wake_pipe(&self) {
        let mut buffer = [0u8; 64];
        loop {
            let rc = unsafe {
                libc::read(
                    self.wake_read,
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };
            if rc <= 0 {
                return;
            }
        }
    }
}

impl Drop for Epoll {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.wake_read);
            libc::close(self.epoll_fd);
        }
    }
}

impl Driver for Epoll {
    type Waker = PipeWaker;

    fn add_fd(&mut self, fd: RawFd, interest: Interest, token: usize) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest_bits(interest), token as u64)
    }

    fn modify_fd(&mut self, fd: RawFd, interest: Interest, token: usize) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest_bits(interest), token as u64)
    }

    fn remove_fd(&mut self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
    }

    fn wait(&mut self, timeout: Option<Duration>, events: &mut Vec<Event>) -> io::Result<usize> {
        const CAPACITY: usize = 64;
        let mut raw: [libc::epoll_event; CAPACITY] =
            unsafe { core::mem::zeroed() };

        let timeout_ms = match timeout {
            // round up so deadlines are never served early
            Some(timeout) => timeout
                .as_millis()
                .saturating_add(u128::from(timeout.subsec_nanos() % 1_000_000 != 0))
                .min(i32::MAX as u128) as libc::c_int,
            None => -1,
        };

        let count = loop {
            let rc = unsafe {
                libc::epoll_wait(self.epoll_fd, raw.as_mut_ptr(), CAPACITY as i32, timeout_ms)
            };
            if rc >= 0 {
                break rc as usize;
            }
            let error = last_error();
            if error.kind() != io::ErrorKind::Interrupted {
                return Err(error);
            }
        };

        let mut delivered = 0;
        for item in raw.iter().take(count) {
            if item.u64 == WAKE_TOKEN {
                self.drain_wake_pipe();
                continue;
            }
            let bits = item.events;
            events.push(Event {
                token: item.u64 as usize,
                readable: bits & libc::EPOLLIN as u32 != 0,
                writable: bits & libc::EPOLLOUT as u32 != 0,
                error: bits & libc::EPOLLERR as u32 != 0,
                closed: bits & libc::EPOLLHUP as u32 != 0,
            });
            delivered += 1;
        }
        Ok(delivered)
    }

    fn waker(&self) -> PipeWaker {
        self.waker.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_interrupts_wait_test() {
        let mut driver = Epoll::new().unwrap();
        let waker = driver.waker();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.wake();
        });

        let mut events = Vec::new();
        // without the wake this would block for the full timeout
        let started = std::time::Instant::now();
        driver
            .wait(Some(Duration::from_secs(5)), &mut events)
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(events.is_empty());
        handle.join().unwrap();
    }

    #[test]
    fn socket_readiness_test() {
        use crate::io::socket::UdpSocket;
        use std::os::fd::AsRawFd;

        let mut driver = Epoll::new().unwrap();
        let receiver = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let sender = UdpSocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = receiver.local_addr().unwrap();

        driver
            .add_fd(receiver.as_raw_fd(), Interest::Readable, 7)
            .unwrap();
        sender.send_to(b"ping", addr).unwrap();

        let mut events = Vec::new();
        driver
            .wait(Some(Duration::from_secs(5)), &mut events)
            .unwrap();
        assert!(events.iter().any(|event| event.token == 7 && event.readable));

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).unwrap().unwrap();
        assert_eq!(&buf[..len], b"ping");
    }
}
