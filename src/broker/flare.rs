//! Wake/notify primitive: a kernel backed byte pipe used to signal "data
//! available" to an external poll-based integrator.

use log::error;
use mio::unix::pipe;

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::{Error, ErrorKind, Result};

/// Edge-triggered file-descriptor signal.
///
/// Both pipe ends are non-blocking and close-on-exec. The read end is the fd
/// exposed to external pollers via [Flare::fd].
pub struct Flare {
    tx: pipe::Sender,
    rx: pipe::Receiver,
}

impl Flare {
    pub fn new() -> Result<Flare> {
        let (tx, rx) = err!(IOError, try: pipe::new(), "creating flare pipe")?;
        Ok(Flare { tx, rx })
    }

    /// The fd that becomes readable once [Flare::fire] was called.
    pub fn fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }

    /// Write one byte into the pipe. A full pipe already carries the signal,
    /// so `EAGAIN` counts as success; interrupted writes are retried.
    pub fn fire(&self) {
        let buf = [0_u8; 1];
        loop {
            match (&self.tx).write(&buf) {
                Ok(n) if n > 0 => break,
                Ok(_) => (),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => {
                    error!("flare fire: {}", err);
                    break;
                }
            }
        }
    }

    /// Drain the pipe.
    pub fn extinguish(&self) {
        let mut buf = [0_u8; 256];
        loop {
            match (&self.rx).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => (),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => {
                    error!("flare extinguish: {}", err);
                    break;
                }
            }
        }
    }

    /// Consume at most one byte, returning whether a byte was read.
    pub fn extinguish_one(&self) -> bool {
        let mut buf = [0_u8; 1];
        loop {
            match (&self.rx).read(&mut buf) {
                Ok(1) => break true,
                Ok(_) => break false,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break false,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => (),
                Err(err) => {
                    error!("flare extinguish_one: {}", err);
                    break false;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "flare_test.rs"]
mod flare_test;
