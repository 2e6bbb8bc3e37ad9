//! A mutable deadline slot.

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tracks one dynamically changing deadline.
///
/// Setting a deadline cancels the previous timer and arms a new one; the
/// timer fires a one-shot broadcast signal that any number of waiters can
/// select on. A fired deadline stays fired until the next `set`.
pub(crate) struct DeadlineManager {
    state: Mutex<State>,
}

struct State {
    fired: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl DeadlineManager {
    pub(crate) fn new() -> Self {
        DeadlineManager {
            state: Mutex::new(State {
                fired: CancellationToken::new(),
                timer: None,
            }),
        }
    }

    /// The current fired signal. Waiters select on it; an already-exceeded
    /// deadline resolves immediately.
    pub(crate) fn fired(&self) -> CancellationToken {
        self.state.lock().fired.clone()
    }

    /// Replace the deadline. `None` disarms it.
    pub(crate) fn set(&self, deadline: Option<Instant>) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        if state.fired.is_cancelled() {
            state.fired = CancellationToken::new();
        }
        if let Some(when) = deadline {
            let fired = state.fired.clone();
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep_until(when).await;
                fired.cancel();
            }));
        }
    }
}

impl Drop for DeadlineManager {
    fn drop(&mut self) {
        if let Some(timer) = self.state.lock().timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn fires_once_at_expiry() {
        let manager = DeadlineManager::new();
        manager.set(Some(Instant::now() + Duration::from_millis(50)));
        let fired = manager.fired();
        assert!(!fired.is_cancelled());
        fired.cancelled().await;
        assert!(manager.fired().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_rearms_after_fire() {
        let manager = DeadlineManager::new();
        manager.set(Some(Instant::now() + Duration::from_millis(10)));
        manager.fired().cancelled().await;

        manager.set(None);
        assert!(!manager.fired().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_cancels_the_old_timer() {
        let manager = DeadlineManager::new();
        manager.set(Some(Instant::now() + Duration::from_millis(10)));
        manager.set(Some(Instant::now() + Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!manager.fired().is_cancelled());
    }
}
