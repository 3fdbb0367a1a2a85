//! Delivery of results onto the owner (interaction) thread.
//!
//! Lookups complete on pool workers; everything that touches presenter state
//! goes through a `Dispatcher` so the host decides which thread runs it.

use std::collections::VecDeque;

use parking_lot::Mutex;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    /// Run `task` on the owner thread, in submission order.
    fn dispatch(&self, task: Task);
}

/// Runs each task immediately on whichever thread dispatched it.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, task: Task) {
        task();
    }
}

/// Queues tasks until the owner thread pumps them with `run_pending()`.
#[derive(Default)]
pub struct QueuedDispatcher {
    queue: Mutex<VecDeque<Task>>,
}

impl QueuedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every queued task, including ones queued while running. Returns
    /// how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Lock released before running: tasks may dispatch again
            let Some(task) = self.queue.lock().pop_front() else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Dispatcher for QueuedDispatcher {
    fn dispatch(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

impl std::fmt::Debug for QueuedDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedDispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}
