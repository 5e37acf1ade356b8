use std::io;
use std::ops::BitOr;
use std::os::fd::{AsRawFd, OwnedFd};

/// Readiness a registration is interested in.
///
/// Read and write interest are independent: the same descriptor may carry
/// one callback for each.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    /// No readiness at all.
    pub const NONE: Interest = Interest {
        read: false,
        write: false,
    };

    /// Read-ready (including hang-up and error conditions).
    pub const READ: Interest = Interest {
        read: true,
        write: false,
    };

    /// One-shot write-ready.
    pub const WRITE: Interest = Interest {
        read: false,
        write: true,
    };

    /// Both read-ready and write-ready.
    pub const BOTH: Interest = Interest {
        read: true,
        write: true,
    };

    pub fn is_readable(self) -> bool {
        self.read
    }

    pub fn is_writable(self) -> bool {
        self.write
    }

    pub fn is_empty(self) -> bool {
        !self.read && !self.write
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
        }
    }
}

/// The reactor's wakeup source: a non-blocking `eventfd`.
pub(crate) struct Waker(pub(crate) OwnedFd);

impl Waker {
    /// Makes the next (or current) poll return immediately.
    pub(crate) fn wake(&self) -> io::Result<()> {
        let buf: u64 = 1;
        let rc = unsafe { libc::write(self.0.as_raw_fd(), &buf as *const u64 as *const _, 8) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: a wakeup is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }

        Ok(())
    }

    /// Resets the counter so the descriptor stops reporting readable.
    pub(crate) fn drain(&self) {
        let mut buf = 0u64;
        unsafe {
            libc::read(self.0.as_raw_fd(), &mut buf as *mut u64 as *mut _, 8);
        }
    }
}
