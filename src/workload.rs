//! Workload boundary.
//!
//! The bridge does not know how to run an isolated workload; it only needs a
//! handle that can report liveness, expose the identity-namespace root the
//! pty slave should be chowned to, and attach the workload's process to a
//! terminal until it exits.

use async_trait::async_trait;
use std::io;
use std::os::fd::OwnedFd;
use std::process::Stdio;
use tracing::debug;

use crate::errors::{ConsoleError, ConsoleResult};

/// A host uid/gid pair as seen from inside the workload's identity
/// namespace. `None` at the trait level means no mapping exists and the pty
/// keeps its unshifted host ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NsIdentity {
    pub uid: u32,
    pub gid: u32,
}

/// Capability handle for the target of a console session.
#[async_trait]
pub trait Workload: Send + Sync {
    fn name(&self) -> &str;

    async fn is_running(&self) -> bool;

    async fn is_frozen(&self) -> bool;

    /// Identity the pty slave is chowned to before the process attaches.
    fn ns_root(&self) -> Option<NsIdentity> {
        None
    }

    /// Attaches the workload's process to `tty` (the pty slave) and blocks
    /// until that process exits or fails to start. The descriptor is consumed;
    /// once this returns, no slave descriptor held on the workload's behalf
    /// remains open.
    async fn attach(&self, tty: OwnedFd) -> ConsoleResult<()>;
}

/// A workload backed by a plain host process, used by the server binary and
/// the integration tests. The command runs with the slave as its controlling
/// terminal and stdio.
pub struct LocalProcessWorkload {
    name: String,
    program: String,
    args: Vec<String>,
}

impl LocalProcessWorkload {
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Workload for LocalProcessWorkload {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_running(&self) -> bool {
        true
    }

    async fn is_frozen(&self) -> bool {
        false
    }

    async fn attach(&self, tty: OwnedFd) -> ConsoleResult<()> {
        let stdin = tty.try_clone().map_err(ConsoleError::Resource)?;
        let stdout = tty.try_clone().map_err(ConsoleError::Resource)?;
        let stderr = tty.try_clone().map_err(ConsoleError::Resource)?;

        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .env("TERM", "xterm-256color");

        // SAFETY: the pre-exec hook only calls async-signal-safe functions.
        // It detaches from the parent's session and makes the slave (already
        // dup'd onto stdin) the controlling terminal.
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY, 0) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|err| {
            ConsoleError::Process(format!("failed to start {}: {err}", self.program))
        })?;
        // The child owns its copies now; drop ours so the master sees EOF as
        // soon as the process exits.
        drop(tty);

        debug!(workload = %self.name, program = %self.program, "attached process to console");

        let status = child
            .wait()
            .await
            .map_err(|err| ConsoleError::Process(err.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(ConsoleError::Process(format!(
                "{} exited with {status}",
                self.program
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyPair;

    #[tokio::test]
    async fn attach_reports_process_exit_status() {
        let workload = LocalProcessWorkload::new("t", "/bin/sh", vec!["-c".into(), "exit 0".into()]);
        let pty = PtyPair::open(None).unwrap();
        workload.attach(pty.slave).await.expect("clean exit");

        let workload = LocalProcessWorkload::new("t", "/bin/sh", vec!["-c".into(), "exit 3".into()]);
        let pty = PtyPair::open(None).unwrap();
        let err = workload.attach(pty.slave).await.unwrap_err();
        assert!(matches!(err, ConsoleError::Process(_)));
    }

    #[tokio::test]
    async fn attach_reports_spawn_failure() {
        let workload = LocalProcessWorkload::new("t", "/nonexistent-program", vec![]);
        let pty = PtyPair::open(None).unwrap();
        let err = workload.attach(pty.slave).await.unwrap_err();
        match err {
            ConsoleError::Process(message) => assert!(message.contains("failed to start")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
