//! Pseudoterminal allocation and geometry.
//!
//! The master side stays with the session orchestrator; the slave side is
//! chowned to the workload's namespace root and handed to the workload
//! attach call. Mirror pumps work on dup'd master descriptors so the master
//! device stays open until the orchestrator drops its handle after draining.

use nix::unistd::{fchown, Gid, Uid};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use crate::workload::NsIdentity;

/// Master side of an allocated pty.
pub struct PtyMaster {
    fd: OwnedFd,
}

/// An allocated pty pair. The slave is handed off wholesale to the workload;
/// the master is shared (`Arc`) with the pumps that read, write, and resize.
pub struct PtyPair {
    pub master: Arc<PtyMaster>,
    pub slave: OwnedFd,
}

impl PtyPair {
    /// Allocates a pty pair. When `identity` is present the slave descriptor
    /// is chowned to it before any process attaches, so the workload's
    /// unprivileged user can open and control its own terminal.
    pub fn open(identity: Option<NsIdentity>) -> io::Result<PtyPair> {
        let pty = nix::pty::openpty(None, None).map_err(io::Error::from)?;

        if let Some(identity) = identity {
            fchown(
                pty.slave.as_raw_fd(),
                Some(Uid::from_raw(identity.uid)),
                Some(Gid::from_raw(identity.gid)),
            )
            .map_err(io::Error::from)?;
        }

        Ok(PtyPair {
            master: Arc::new(PtyMaster { fd: pty.master }),
            slave: pty.slave,
        })
    }
}

impl PtyMaster {
    /// Sets the terminal geometry on the master side.
    pub fn resize(&self, width: u16, height: u16) -> io::Result<()> {
        let size = libc::winsize {
            ws_row: height,
            ws_col: width,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: TIOCSWINSZ reads a winsize struct through a pointer that is
        // valid for the duration of the call; the fd is owned by self.
        let rc = unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::TIOCSWINSZ, &size) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Current geometry as `(width, height)`.
    pub fn size(&self) -> io::Result<(u16, u16)> {
        let mut size = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: TIOCGWINSZ writes a winsize struct through a pointer that
        // is valid for the duration of the call.
        let rc = unsafe { libc::ioctl(self.fd.as_raw_fd(), libc::TIOCGWINSZ, &mut size) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((size.ws_col, size.ws_row))
    }

    /// Dup of the master for blocking reads.
    pub fn reader(&self) -> io::Result<File> {
        Ok(File::from(self.fd.try_clone()?))
    }

    /// Dup of the master for blocking writes.
    pub fn writer(&self) -> io::Result<File> {
        Ok(File::from(self.fd.try_clone()?))
    }
}

impl std::fmt::Debug for PtyMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyMaster")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}
