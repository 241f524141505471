//! Single-slot latch between the notification receiver and the engine.
//!
//! The receiver task deposits every decoded status. The engine arms a wait
//! before it sends a command, so a status that lands while the confirmed write
//! is still in flight is not lost. Only the latest status is kept.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::protocol::OtaStatus;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    last: Option<OtaStatus>,
    seq: u64,
    closed: bool,
}

/// Shared handle to the status slot. Cloned into the notification task.
#[derive(Debug, Clone)]
pub struct StatusLatch {
    tx: Arc<watch::Sender<Slot>>,
}

/// Why a status wait ended without a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
    Closed,
}

impl Default for StatusLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLatch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Slot::default());
        Self { tx: Arc::new(tx) }
    }

    /// Store a freshly received status, waking any armed wait.
    pub fn deposit(&self, status: OtaStatus) {
        self.tx.send_modify(|slot| {
            slot.last = Some(status);
            slot.seq = slot.seq.wrapping_add(1);
        });
    }

    /// Mark the notification source as gone.
    pub fn close(&self) {
        self.tx.send_modify(|slot| slot.closed = true);
    }

    /// Last status deposited since the latch was last armed.
    pub fn last(&self) -> Option<OtaStatus> {
        self.tx.borrow().last
    }

    /// Clear the slot and start watching for the next deposit.
    pub fn arm(&self) -> StatusWait {
        self.tx.send_modify(|slot| slot.last = None);
        let rx = self.tx.subscribe();
        let seq = rx.borrow().seq;
        StatusWait { rx, seq }
    }
}

/// One outstanding "await next status", created by [`StatusLatch::arm`].
#[derive(Debug)]
pub struct StatusWait {
    rx: watch::Receiver<Slot>,
    seq: u64,
}

impl StatusWait {
    /// Resolve with the first status deposited after arming.
    pub async fn wait(mut self, timeout: Duration) -> Result<OtaStatus, WaitError> {
        let armed = self.seq;
        let changed = self.rx.wait_for(|slot| slot.seq != armed || slot.closed);
        let slot = match tokio::time::timeout(timeout, changed).await {
            Err(_) => return Err(WaitError::Timeout),
            Ok(Err(_)) => return Err(WaitError::Closed),
            Ok(Ok(slot)) => *slot,
        };
        match slot.last {
            Some(status) if slot.seq != armed => Ok(status),
            _ => Err(WaitError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deposit_before_polling_is_observed() {
        let latch = StatusLatch::new();
        let wait = latch.arm();
        latch.deposit(OtaStatus::Busy);
        assert_eq!(wait.wait(Duration::from_secs(1)).await, Ok(OtaStatus::Busy));
    }

    #[tokio::test]
    async fn status_from_previous_phase_does_not_satisfy_new_wait() {
        let latch = StatusLatch::new();
        latch.deposit(OtaStatus::Busy);
        let wait = latch.arm();
        assert_eq!(latch.last(), None);

        let feeder = latch.clone();
        tokio::spawn(async move { feeder.deposit(OtaStatus::Ok) });
        assert_eq!(wait.wait(Duration::from_secs(1)).await, Ok(OtaStatus::Ok));
        assert_eq!(latch.last(), Some(OtaStatus::Ok));
    }

    #[tokio::test]
    async fn latest_status_wins() {
        let latch = StatusLatch::new();
        let wait = latch.arm();
        latch.deposit(OtaStatus::Busy);
        latch.deposit(OtaStatus::Error);
        assert_eq!(wait.wait(Duration::from_secs(1)).await, Ok(OtaStatus::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_times_out() {
        let latch = StatusLatch::new();
        let wait = latch.arm();
        assert_eq!(wait.wait(Duration::from_secs(10)).await, Err(WaitError::Timeout));
    }

    #[tokio::test]
    async fn closed_source_ends_wait_but_keeps_last_status() {
        let latch = StatusLatch::new();
        let wait = latch.arm();
        latch.deposit(OtaStatus::Ok);
        latch.close();
        // The deposit still counts for this wait.
        assert_eq!(wait.wait(Duration::from_secs(1)).await, Ok(OtaStatus::Ok));

        let wait = latch.arm();
        assert_eq!(wait.wait(Duration::from_secs(1)).await, Err(WaitError::Closed));
    }
}
