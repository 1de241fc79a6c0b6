//! Out-of-band control pump.
//!
//! Decodes structured commands from the control channel and applies them to
//! the live pty. The loop does no work until either the control channel
//! connects or the orchestrator fires the shutdown latch because no control
//! client ever showed up.

use axum::extract::ws::Message;
use serde::Deserialize;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

use super::secrets::ChannelId;
use super::session::ConsoleSession;
use crate::pty::PtyMaster;

/// Commands accepted on the control channel. Unknown commands decode to
/// `Unknown` and are ignored, keeping the wire format forward-compatible.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub(crate) enum ControlCommand {
    WindowResize { args: ResizeArgs },
    #[serde(other)]
    Unknown,
}

/// Resize arguments arrive as base-10 integer strings.
#[derive(Debug, Deserialize)]
pub(crate) struct ResizeArgs {
    width: String,
    height: String,
}

impl ResizeArgs {
    pub(crate) fn geometry(&self) -> Option<(u16, u16)> {
        let width = self.width.parse().ok()?;
        let height = self.height.parse().ok()?;
        Some((width, height))
    }
}

pub(crate) async fn run(session: Arc<ConsoleSession>, master: Weak<PtyMaster>) {
    tokio::select! {
        _ = session.control_ready.wait() => {}
        _ = session.control_shutdown.wait() => {
            debug!(session = %session.id, "control channel never connected");
            return;
        }
    }

    let Some(mut socket) = session.table.claim(ChannelId::Control) else {
        debug!(session = %session.id, "control channel signalled ready but had no connection");
        return;
    };

    while let Some(message) = socket.recv().await {
        let raw = match message {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(session = %session.id, error = %err, "control socket read failed");
                break;
            }
        };
        apply(session.id, &master, &raw);
    }

    debug!(session = %session.id, "control pump finished");
}

/// Applies one raw control message. Malformed commands and failed resizes
/// are logged and skipped; they never terminate the loop or the session.
fn apply(session: Uuid, master: &Weak<PtyMaster>, raw: &str) {
    let command: ControlCommand = match serde_json::from_str(raw) {
        Ok(command) => command,
        Err(err) => {
            debug!(%session, error = %err, "failed to decode control command");
            return;
        }
    };

    match command {
        ControlCommand::WindowResize { args } => {
            let Some((width, height)) = args.geometry() else {
                debug!(%session, ?args, "unable to parse window geometry");
                return;
            };
            let Some(master) = master.upgrade() else {
                debug!(%session, "window resize after pty close, skipping");
                return;
            };
            match master.resize(width, height) {
                Ok(()) => debug!(%session, width, height, "set window size"),
                Err(err) => {
                    debug!(%session, width, height, error = %err, "failed to set window size");
                }
            }
        }
        ControlCommand::Unknown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyPair;

    #[test]
    fn decodes_window_resize() {
        let raw = r#"{"command":"window-resize","args":{"width":"80","height":"24"}}"#;
        let command: ControlCommand = serde_json::from_str(raw).unwrap();
        match command {
            ControlCommand::WindowResize { args } => {
                assert_eq!(args.geometry(), Some((80, 24)));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn unknown_commands_decode_to_noop() {
        let raw = r#"{"command":"make-coffee","args":{"sugar":"2"}}"#;
        let command: ControlCommand = serde_json::from_str(raw).unwrap();
        assert!(matches!(command, ControlCommand::Unknown));
    }

    #[test]
    fn non_numeric_geometry_is_rejected() {
        let raw = r#"{"command":"window-resize","args":{"width":"wide","height":"24"}}"#;
        let command: ControlCommand = serde_json::from_str(raw).unwrap();
        match command {
            ControlCommand::WindowResize { args } => assert_eq!(args.geometry(), None),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn apply_resizes_a_live_master_and_skips_garbage() {
        let pty = PtyPair::open(None).unwrap();
        let weak = Arc::downgrade(&pty.master);
        let session = Uuid::new_v4();

        apply(
            session,
            &weak,
            r#"{"command":"window-resize","args":{"width":"100","height":"30"}}"#,
        );
        assert_eq!(pty.master.size().unwrap(), (100, 30));

        // Garbage leaves the geometry untouched.
        apply(session, &weak, "not json");
        apply(
            session,
            &weak,
            r#"{"command":"window-resize","args":{"width":"x","height":"30"}}"#,
        );
        assert_eq!(pty.master.size().unwrap(), (100, 30));
    }

    #[test]
    fn apply_after_master_close_is_a_noop() {
        let pty = PtyPair::open(None).unwrap();
        let weak = Arc::downgrade(&pty.master);
        drop(pty);
        apply(
            Uuid::new_v4(),
            &weak,
            r#"{"command":"window-resize","args":{"width":"100","height":"30"}}"#,
        );
    }
}
