//! Websocket terminal attachment bridge for sandboxed workloads.
//!
//! A console session exposes a running workload's pseudoterminal as a set of
//! authenticated websocket channels: one bidirectional data channel carrying
//! raw terminal bytes, and an out-of-band control channel carrying structured
//! commands (currently window resizes). Channels are unlocked by per-session
//! secrets handed out once at session creation; they may connect in any
//! order, and the control channel may never connect at all.

pub mod api;
pub mod console;
pub mod errors;
pub mod pty;
pub mod workload;

pub use api::{build_router, AppState};
pub use console::{ChannelId, ConsoleSession, SessionState};
pub use errors::{ConsoleError, ConsoleResult};
pub use workload::{LocalProcessWorkload, NsIdentity, Workload};
