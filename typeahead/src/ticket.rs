//! One-shot ticket deciding the race between cancelling a unit of work and
//! completing it.
//!
//! Both sides go through a single compare-and-swap on `state`, so exactly one
//! of `cancel()` / `complete()` returns `true` for a given ticket.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const COMPLETED: u8 = 2;

/// Shared handle to a pending timer or lookup. Clones refer to the same ticket.
#[derive(Debug, Clone)]
pub struct WorkTicket {
    inner: Arc<TicketInner>,
}

#[derive(Debug)]
struct TicketInner {
    state: AtomicU8,
    token: CancellationToken,
}

impl WorkTicket {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TicketInner {
                state: AtomicU8::new(PENDING),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Cancel the work. Returns `false` if it already completed or was cancelled.
    pub fn cancel(&self) -> bool {
        let won = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.inner.token.cancel();
        }
        won
    }

    /// Claim the right to publish. Returns `false` if the work was cancelled.
    pub fn complete(&self) -> bool {
        self.inner
            .state
            .compare_exchange(PENDING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Token that fires when this ticket is cancelled.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    pub fn same_as(&self, other: &WorkTicket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for WorkTicket {
    fn default() -> Self {
        Self::new()
    }
}
