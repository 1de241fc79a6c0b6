//! Connection table and one-shot latches.
//!
//! The table is the only structure mutated by more than one task in a
//! session. Its lock is held for the duration of the map access and never
//! across socket or pty I/O.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::Notify;

use super::secrets::ChannelId;
use crate::errors::{ConsoleError, ConsoleResult};

enum Slot<C> {
    Empty,
    Bound(C),
    /// The owning pump took the connection to drive I/O. Still counts as
    /// bound for readiness accounting.
    Claimed,
}

impl<C> Slot<C> {
    fn is_bound(&self) -> bool {
        !matches!(self, Slot::Empty)
    }
}

/// Thread-safe map from channel id to its established connection, if any.
///
/// A slot transitions `Empty -> Bound` exactly once; a second bind for the
/// same channel is rejected and the original connection keeps the slot.
pub struct ConnectionTable<C> {
    slots: Mutex<HashMap<ChannelId, Slot<C>>>,
}

impl<C> ConnectionTable<C> {
    pub fn new(channels: impl IntoIterator<Item = ChannelId>) -> Self {
        let slots = channels
            .into_iter()
            .map(|channel| (channel, Slot::Empty))
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Records `conn` in the channel's slot. Fails with `AlreadyConnected`
    /// if the slot is occupied, dropping `conn`.
    pub fn try_bind(&self, channel: ChannelId, conn: C) -> ConsoleResult<()> {
        let mut slots = self.slots.lock();
        match slots.get_mut(&channel) {
            Some(slot @ Slot::Empty) => {
                *slot = Slot::Bound(conn);
                Ok(())
            }
            Some(_) => Err(ConsoleError::AlreadyConnected(channel)),
            None => Err(ConsoleError::Authorization),
        }
    }

    /// True iff every data channel has been bound at some point. Monotonic:
    /// once true it stays true for the session's life.
    pub fn all_data_bound(&self) -> bool {
        self.slots
            .lock()
            .iter()
            .all(|(channel, slot)| matches!(channel, ChannelId::Control) || slot.is_bound())
    }

    pub fn is_bound(&self, channel: ChannelId) -> bool {
        self.slots
            .lock()
            .get(&channel)
            .map(Slot::is_bound)
            .unwrap_or(false)
    }

    /// Takes the connection out of a bound slot so a pump can own its I/O.
    /// Returns `None` if the slot is empty or was already claimed.
    pub fn claim(&self, channel: ChannelId) -> Option<C> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(&channel)?;
        match std::mem::replace(slot, Slot::Claimed) {
            Slot::Bound(conn) => Some(conn),
            other => {
                *slot = other;
                None
            }
        }
    }
}

/// Single-slot, one-shot signal.
///
/// Firing stores at most one permit, so firing an already-fired latch is a
/// no-op rather than an error or a block; waiting consumes the permit and
/// suspends until one is available.
#[derive(Default)]
pub struct Latch {
    notify: Notify,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn table() -> ConnectionTable<&'static str> {
        ConnectionTable::new([ChannelId::Control, ChannelId::Data(0), ChannelId::Data(1)])
    }

    #[test]
    fn bind_transitions_absent_to_present_exactly_once() {
        let table = table();
        assert!(!table.is_bound(ChannelId::Data(0)));

        table.try_bind(ChannelId::Data(0), "first").unwrap();
        assert!(table.is_bound(ChannelId::Data(0)));

        let err = table.try_bind(ChannelId::Data(0), "second").unwrap_err();
        assert!(matches!(
            err,
            ConsoleError::AlreadyConnected(ChannelId::Data(0))
        ));
        // The original connection keeps the slot.
        assert_eq!(table.claim(ChannelId::Data(0)), Some("first"));
    }

    #[test]
    fn all_data_bound_is_monotonic_and_ignores_control() {
        let table = table();
        assert!(!table.all_data_bound());

        table.try_bind(ChannelId::Control, "ctl").unwrap();
        assert!(!table.all_data_bound(), "control does not count");

        table.try_bind(ChannelId::Data(1), "d1").unwrap();
        assert!(!table.all_data_bound());

        table.try_bind(ChannelId::Data(0), "d0").unwrap();
        assert!(table.all_data_bound());

        // Claiming a socket must not flip readiness back.
        table.claim(ChannelId::Data(0)).unwrap();
        assert!(table.all_data_bound());
        assert!(table.is_bound(ChannelId::Data(0)));
    }

    #[test]
    fn claim_yields_the_connection_once() {
        let table = table();
        table.try_bind(ChannelId::Control, "ctl").unwrap();
        assert_eq!(table.claim(ChannelId::Control), Some("ctl"));
        assert_eq!(table.claim(ChannelId::Control), None);
        assert_eq!(table.claim(ChannelId::Data(0)), None, "empty slot");
    }

    #[tokio::test]
    async fn latch_fire_then_wait() {
        let latch = Latch::new();
        latch.fire();
        tokio::time::timeout(Duration::from_secs(1), latch.wait())
            .await
            .expect("stored permit satisfies a later wait");
    }

    #[tokio::test]
    async fn latch_double_fire_collapses_to_one_permit() {
        let latch = Latch::new();
        latch.fire();
        latch.fire();
        tokio::time::timeout(Duration::from_secs(1), latch.wait())
            .await
            .expect("first wait consumes the permit");
        let second = tokio::time::timeout(Duration::from_millis(50), latch.wait()).await;
        assert!(second.is_err(), "second wait must block");
    }

    #[tokio::test]
    async fn latch_wait_then_fire() {
        let latch = std::sync::Arc::new(Latch::new());
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.wait().await })
        };
        tokio::task::yield_now().await;
        latch.fire();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter wakes")
            .unwrap();
    }
}
