//! Idle-leave timer ("leaving waiter").
//!
//! One pending delayed action at most.  Arming while armed replaces the old
//! instance instead of stacking a second one.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct IdleLeaveTimer {
    pending: Option<JoinHandle<()>>,
}

impl IdleLeaveTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_fire` to run after `after`, cancelling any pending one.
    pub fn arm<F>(&mut self, after: Duration, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            on_fire.await;
        }));
    }

    /// Returns true if a pending timer was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    /// Forget the handle without aborting it.  Called from inside the firing
    /// task so that a later `cancel` does not abort the task running it.
    pub fn disarm_fired(&mut self) {
        self.pending.take();
    }

    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for IdleLeaveTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
