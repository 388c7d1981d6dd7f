//! The re-armable per-node trigger (§4.2, §9).
//!
//! The original source re-creates an `asyncio.Future` every cycle: a waiter
//! does `yield from self.trigger`, and `next_trigger()` resolves the current
//! future and swaps in a fresh one. `tokio::sync::watch` gives the same
//! "broadcast a generation change, waiters loop until satisfied" shape
//! without hand-rolling a future, so `next_trigger`/`wait_trigger` below are
//! a direct translation rather than a redesign.

use tokio::sync::watch;

/// What a node's trigger currently reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerState {
    /// `recv` items have been consumed so far (starts at -1, per §3).
    Running { recv: i64 },
    /// The node (or its envelope) has stopped; every waiter must abandon.
    Stopped,
}

/// A single node's re-armable one-shot, backed by a watch channel.
pub struct Trigger {
    tx: watch::Sender<TriggerState>,
    rx: watch::Receiver<TriggerState>,
}

impl Trigger {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(TriggerState::Running { recv: -1 });
        Self { tx, rx }
    }

    /// Current `recv` value, or `None` if stopped.
    pub fn recv(&self) -> Option<i64> {
        match *self.rx.borrow() {
            TriggerState::Running { recv } => Some(recv),
            TriggerState::Stopped => None,
        }
    }

    /// Advance `recv` by one and wake every waiter (`next_trigger` in the source).
    pub fn advance(&self) {
        let next = match *self.tx.borrow() {
            TriggerState::Running { recv } => recv + 1,
            TriggerState::Stopped => return,
        };
        // `send` only errors if every receiver was dropped, which can't
        // happen here since `self.rx` keeps one alive.
        let _ = self.tx.send(TriggerState::Running { recv: next });
    }

    /// Resolve the trigger with a failure sentinel (§3 invariant 5, §5).
    /// Idempotent: stopping twice is a no-op.
    pub fn stop(&self) {
        let _ = self.tx.send(TriggerState::Stopped);
    }

    /// Block until `recv >= index`, or return `false` if the trigger stops
    /// first (`wait_trigger` in the source).
    pub async fn wait(&self, index: i64) -> bool {
        let mut rx = self.rx.clone();
        loop {
            match *rx.borrow() {
                TriggerState::Running { recv } if recv >= index => return true,
                TriggerState::Stopped => return false,
                TriggerState::Running { .. } => {}
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn wait_returns_immediately_when_already_satisfied() {
        let t = Trigger::new();
        t.advance(); // recv = 0
        assert!(t.wait(0).await);
    }

    #[tokio::test]
    async fn wait_blocks_until_advance() {
        let t = Arc::new(Trigger::new());
        let t2 = t.clone();
        let handle = tokio::spawn(async move { t2.wait(2).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        t.advance(); // recv = 0
        t.advance(); // recv = 1
        t.advance(); // recv = 2
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn stop_wakes_every_waiter_with_false() {
        let t = Arc::new(Trigger::new());
        let mut handles = vec![];
        for _ in 0..3 {
            let t2 = t.clone();
            handles.push(tokio::spawn(async move { t2.wait(100).await }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        t.stop();
        for h in handles {
            assert!(!h.await.unwrap());
        }
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let t = Trigger::new();
        t.stop();
        t.stop();
        assert!(!t.wait(0).await);
    }
}
