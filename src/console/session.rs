//! Console session lifecycle.
//!
//! A session owns the secrets, the connection table, and the pty for one
//! terminal attachment. The orchestrator blocks until the data channel is
//! live, allocates the pty with ownership shifted to the workload's
//! namespace root, fans out into the control pump and the data mirror,
//! attaches the workload's process, and on exit drains the mirror before
//! closing the master so no buffered output is lost.

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::Response;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::control;
use super::mirror;
use super::secrets::{ChannelId, SecretRegistry};
use super::table::{ConnectionTable, Latch};
use crate::errors::{ConsoleError, ConsoleResult};
use crate::pty::PtyPair;
use crate::workload::Workload;

/// Data channels per session. The model supports more; the wire protocol
/// currently uses one.
const DATA_CHANNELS: u32 = 1;

/// Observable lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    WaitingForData,
    PtyOpen,
    Running,
    Draining,
    Closed,
    Failed,
}

pub struct ConsoleSession {
    pub id: Uuid,
    pub(crate) workload: Arc<dyn Workload>,
    width: u16,
    height: u16,
    pub(crate) secrets: SecretRegistry,
    pub(crate) table: ConnectionTable<WebSocket>,
    pub(crate) data_ready: Latch,
    pub(crate) control_ready: Latch,
    pub(crate) control_shutdown: Latch,
    state: RwLock<SessionState>,
}

impl ConsoleSession {
    /// Creates a session for `workload`. `width`/`height` of 0 mean "do not
    /// resize"; both must be positive for the initial geometry to apply.
    pub fn new(workload: Arc<dyn Workload>, width: u16, height: u16) -> Self {
        let secrets = SecretRegistry::new(DATA_CHANNELS);
        let table = ConnectionTable::new(secrets.channels());
        Self {
            id: Uuid::new_v4(),
            workload,
            width,
            height,
            secrets,
            table,
            data_ready: Latch::new(),
            control_ready: Latch::new(),
            control_shutdown: Latch::new(),
            state: RwLock::new(SessionState::WaitingForData),
        }
    }

    /// The channel-discovery metadata returned once at creation:
    /// `{"fds": {"control": <token>, "0": <token>}}`.
    pub fn metadata(&self) -> serde_json::Value {
        self.secrets.metadata()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Handles one inbound upgrade request for any of the session's
    /// channels. The secret is validated before the transport upgrade so a
    /// bad credential maps to a 403 on the plain request; the bind itself
    /// happens once the socket exists.
    pub fn connect(
        self: &Arc<Self>,
        secret: Option<&str>,
        ws: WebSocketUpgrade,
    ) -> ConsoleResult<Response> {
        let secret = secret
            .filter(|s| !s.is_empty())
            .ok_or(ConsoleError::MissingSecret)?;
        let channel = self
            .secrets
            .lookup(secret)
            .ok_or(ConsoleError::Authorization)?;
        if self.table.is_bound(channel) {
            return Err(ConsoleError::AlreadyConnected(channel));
        }

        let session = Arc::clone(self);
        Ok(ws.on_upgrade(move |socket| async move {
            session.bind(channel, socket);
        }))
    }

    /// Binds an upgraded socket into the table and fires the readiness
    /// signal the orchestrator or control pump is waiting on.
    fn bind(&self, channel: ChannelId, socket: WebSocket) {
        if let Err(err) = self.table.try_bind(channel, socket) {
            // Lost a race with a duplicate handshake; the late socket drops.
            warn!(session = %self.id, %channel, error = %err, "dropping duplicate channel connection");
            return;
        }
        debug!(session = %self.id, %channel, "console channel connected");

        match channel {
            ChannelId::Control => self.control_ready.fire(),
            ChannelId::Data(_) => {
                if self.table.all_data_bound() {
                    self.data_ready.fire();
                }
            }
        }
    }

    /// Runs the session to completion. Call exactly once.
    ///
    /// Suspends until every data channel is connected, then allocates the
    /// pty and attaches the workload. The returned error is the workload
    /// process's own outcome (or the pty setup failure); cleanup errors
    /// never mask it.
    pub async fn run(self: &Arc<Self>) -> ConsoleResult<()> {
        let result = self.run_inner().await;
        match &result {
            Ok(()) => {
                self.set_state(SessionState::Closed);
                info!(session = %self.id, workload = %self.workload.name(), "console session closed");
            }
            Err(err) => {
                self.set_state(SessionState::Failed);
                warn!(session = %self.id, workload = %self.workload.name(), error = %err, "console session failed");
            }
        }
        result
    }

    async fn run_inner(self: &Arc<Self>) -> ConsoleResult<()> {
        self.data_ready.wait().await;
        self.set_state(SessionState::PtyOpen);

        let pty = PtyPair::open(self.workload.ns_root())?;
        if self.width > 0 && self.height > 0 {
            if let Err(err) = pty.master.resize(self.width, self.height) {
                warn!(session = %self.id, error = %err, "failed to apply initial console geometry");
            }
        }
        let PtyPair { master, slave } = pty;

        tokio::spawn(control::run(Arc::clone(self), Arc::downgrade(&master)));

        let data_socket = self
            .table
            .claim(ChannelId::Data(0))
            .ok_or_else(|| ConsoleError::Transport("data channel gone after ready".into()))?;
        let (read_done, write_done) = mirror::spawn(self.id, data_socket, &master);

        self.set_state(SessionState::Running);
        let attach_result = self.workload.attach(slave).await;
        // The workload and the attach call dropped every slave descriptor,
        // which is what lets the mirror's pty-read direction finish.

        self.set_state(SessionState::Draining);
        if !self.table.is_bound(ChannelId::Control) {
            self.control_shutdown.fire();
        }
        let _ = read_done.await;
        let _ = write_done.await;

        // Master closes only now, after the mirror has fully drained.
        drop(master);

        attach_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::LocalProcessWorkload;

    fn session() -> Arc<ConsoleSession> {
        let workload = Arc::new(LocalProcessWorkload::new("w", "/bin/true", vec![]));
        Arc::new(ConsoleSession::new(workload, 0, 0))
    }

    #[test]
    fn metadata_lists_every_channel_secret() {
        let session = session();
        let metadata = session.metadata();
        let fds = metadata["fds"].as_object().unwrap();
        assert_eq!(fds.len(), 2);
        assert!(fds.contains_key("control"));
        assert!(fds.contains_key("0"));
    }

    #[test]
    fn starts_waiting_for_data() {
        assert_eq!(session().state(), SessionState::WaitingForData);
    }
}
