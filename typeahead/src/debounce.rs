//! Per-field debounce timer.
//!
//! `schedule` cancels the previous timer and arms the new one under the same
//! lock, so callers never see a window where two timers are live. The timer
//! itself runs on the worker pool; whether it fires or gets cancelled is
//! settled by its `WorkTicket`.

use std::time::Duration;

use parking_lot::Mutex;

use crate::interface::SearchResult;
use crate::pool::PoolExecutor;
use crate::ticket::WorkTicket;

pub struct DebounceScheduler {
    executor: PoolExecutor,
    pending: Mutex<Option<WorkTicket>>,
}

impl DebounceScheduler {
    pub fn new(executor: PoolExecutor) -> Self {
        Self {
            executor,
            pending: Mutex::new(None),
        }
    }

    /// Replace any pending action with `action`, to run on a pool worker after `delay`.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> SearchResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut pending = self.pending.lock();
        if let Some(previous) = pending.take() {
            previous.cancel();
        }

        let ticket = WorkTicket::new();
        let timer = ticket.clone();
        self.executor.spawn(async move {
            tokio::select! {
                biased;
                _ = timer.token().cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if timer.complete() {
                        action();
                    }
                }
            }
        })?;

        *pending = Some(ticket);
        Ok(())
    }

    /// Cancel the pending action. Returns `true` if one was actually stopped.
    pub fn cancel(&self) -> bool {
        self.pending
            .lock()
            .take()
            .map(|ticket| ticket.cancel())
            .unwrap_or(false)
    }

    /// Whether a timer is armed and has neither fired nor been cancelled.
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(WorkTicket::is_pending)
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
