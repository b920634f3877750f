use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// Wakes the thread driving [`DeviceSession::update`](crate::session::DeviceSession::update)
/// early, so a freshly queued command goes out without waiting for the next
/// timer tick.
#[derive(Clone, Default)]
pub struct WakeSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake(&self) {
        let (pending, condvar) = &*self.inner;
        *pending.lock() = true;
        condvar.notify_all();
    }

    /// Block until woken or until `timeout` elapses. Returns whether a wake
    /// was pending, and clears it.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (pending, condvar) = &*self.inner;
        let mut woken = pending.lock();
        if !*woken {
            condvar.wait_for(&mut woken, timeout);
        }
        std::mem::replace(&mut *woken, false)
    }
}
