//! Console session core: secrets, connection table, pumps, orchestrator.

mod control;
mod mirror;
mod secrets;
mod session;
mod table;

pub use secrets::{ChannelId, SecretRegistry};
pub use session::{ConsoleSession, SessionState};
pub use table::{ConnectionTable, Latch};
