//! Destinations for guest `fd_write` output.

use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::abi::{FD_STDERR, FD_STDOUT};

/// Where the guest's stdout and stderr bytes go.
pub trait Console {
    /// Write `bytes` to `fd` (1 or 2).
    fn write(&mut self, fd: i32, bytes: &[u8]) -> io::Result<()>;
}

/// Forwards to the process's own stdout/stderr.
#[derive(Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn write(&mut self, fd: i32, bytes: &[u8]) -> io::Result<()> {
        if fd == FD_STDERR {
            let mut err = io::stderr().lock();
            err.write_all(bytes)?;
            err.flush()
        } else {
            let mut out = io::stdout().lock();
            out.write_all(bytes)?;
            out.flush()
        }
    }
}

/// In-memory console; clones share the same buffers.
#[derive(Debug, Clone, Default)]
pub struct CapturedConsole {
    inner: Rc<RefCell<Captured>>,
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl CapturedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.inner.borrow().stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.inner.borrow().stderr).into_owned()
    }
}

impl Console for CapturedConsole {
    fn write(&mut self, fd: i32, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.borrow_mut();
        match fd {
            FD_STDOUT => inner.stdout.extend_from_slice(bytes),
            FD_STDERR => inner.stderr.extend_from_slice(bytes),
            _ => return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad fd")),
        }
        Ok(())
    }
}
