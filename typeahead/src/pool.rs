//! Reference-counted worker pool shared by every active search field.
//!
//! The pool owns a multi-threaded Tokio runtime that exists only while at
//! least one field holds a `PoolHandle`. The first `acquire()` builds it, the
//! last release shuts it down synchronously. Registration count, creation and
//! teardown all happen under one mutex, so a release racing an acquire can
//! never observe a half-built or half-destroyed runtime.
//!
//! Shutdown order:
//! 1. The executor stops accepting work (`PoolUnavailable` from then on)
//! 2. The runtime drains for at most `drain_timeout`
//! 3. Whatever is still running is abandoned (async tasks are dropped)

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::interface::{SearchError, SearchResult};

/// Shared, lazily-created worker pool. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SharedWorkerPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    registrations: usize,
    active: Option<ActivePool>,
    /// Bumped every time a new runtime is built
    generation: u64,
}

struct ActivePool {
    runtime: Runtime,
    executor: PoolExecutor,
}

impl SharedWorkerPool {
    /// Create an inactive pool. No threads exist until the first `acquire()`.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                config,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Register a caller, building the runtime if this is the first registration.
    pub fn acquire(&self) -> SearchResult<PoolHandle> {
        let mut state = self.shared.state.lock();

        let executor = match &state.active {
            Some(active) => active.executor.clone(),
            None => {
                let runtime = build_runtime(&self.shared.config)
                    .map_err(|e| SearchError::PoolStartup(e.to_string()))?;
                state.generation += 1;
                let executor = PoolExecutor::new(runtime.handle().clone(), state.generation);
                info!(
                    generation = state.generation,
                    workers = self.shared.config.worker_count(),
                    "typeahead worker pool started"
                );
                state.active = Some(ActivePool {
                    runtime,
                    executor: executor.clone(),
                });
                executor
            }
        };

        state.registrations += 1;
        debug!(registrations = state.registrations, "worker pool acquired");

        Ok(PoolHandle {
            shared: Arc::clone(&self.shared),
            executor,
            released: AtomicBool::new(false),
        })
    }

    /// Unregister a caller. Equivalent to `handle.release()`.
    pub fn release(&self, handle: PoolHandle) {
        handle.release();
    }

    pub fn registrations(&self) -> usize {
        self.shared.state.lock().registrations
    }

    pub fn is_active(&self) -> bool {
        self.shared.state.lock().active.is_some()
    }

    /// Generation of the most recently built runtime (0 = never started).
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }
}

impl Default for SharedWorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for SharedWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("SharedWorkerPool")
            .field("registrations", &state.registrations)
            .field("active", &state.active.is_some())
            .field("generation", &state.generation)
            .finish()
    }
}

impl PoolShared {
    fn unregister(&self) {
        let mut state = self.state.lock();
        state.registrations = state.registrations.saturating_sub(1);
        debug!(registrations = state.registrations, "worker pool released");

        if state.registrations == 0 {
            if let Some(active) = state.active.take() {
                // Still holding the lock: a concurrent acquire waits for the
                // old runtime to be gone before building the next one.
                shut_down(active, self.config.drain_timeout());
            }
        }
    }
}

fn build_runtime(config: &PoolConfig) -> std::io::Result<Runtime> {
    let prefix = config.thread_name_prefix.clone();
    let counter = Arc::new(AtomicUsize::new(0));

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_count())
        .thread_name_fn(move || format!("{}-{}", prefix, counter.fetch_add(1, Ordering::Relaxed)))
        .on_thread_start(|| {
            // Keep the interaction thread ahead of background lookups.
            use thread_priority::*;
            let _ = set_current_thread_priority(ThreadPriority::Min);
        })
        .enable_all()
        .build()
}

fn shut_down(active: ActivePool, drain_timeout: Duration) {
    let ActivePool { runtime, executor } = active;
    executor.inner.accepting.store(false, Ordering::SeqCst);

    let generation = executor.generation();
    let started = Instant::now();

    // A runtime can't be dropped from inside async context, and release() may
    // run on one of its own workers. Shut down from a dedicated thread.
    let shutdown = std::thread::Builder::new()
        .name("typeahead-pool-shutdown".to_string())
        .spawn(move || runtime.shutdown_timeout(drain_timeout));

    match shutdown {
        Ok(thread) => {
            if thread.join().is_err() {
                warn!(generation, "worker pool shutdown thread panicked");
            }
        }
        Err(e) => warn!(generation, error = %e, "could not spawn worker pool shutdown thread"),
    }

    let elapsed = started.elapsed();
    if elapsed >= drain_timeout {
        warn!(generation, ?elapsed, "worker pool drain timed out; remaining work abandoned");
    } else {
        info!(generation, ?elapsed, "typeahead worker pool shut down");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLES
// ═══════════════════════════════════════════════════════════════════════════════

/// A caller's registration with the pool. Releasing (or dropping) it is
/// idempotent; the last release tears the runtime down.
pub struct PoolHandle {
    shared: Arc<PoolShared>,
    executor: PoolExecutor,
    released: AtomicBool,
}

impl PoolHandle {
    /// Submit surface for this registration's runtime.
    pub fn executor(&self) -> &PoolExecutor {
        &self.executor
    }

    pub fn generation(&self) -> u64 {
        self.executor.generation()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Unregister. Returns `true` on the first call only.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.unregister();
        true
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHandle")
            .field("generation", &self.generation())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Cloneable submit surface bound to one runtime generation.
#[derive(Clone)]
pub struct PoolExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    handle: tokio::runtime::Handle,
    accepting: AtomicBool,
    generation: u64,
}

impl PoolExecutor {
    fn new(handle: tokio::runtime::Handle, generation: u64) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                handle,
                accepting: AtomicBool::new(true),
                generation,
            }),
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// `false` once shutdown of this executor's runtime has begun.
    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    pub fn spawn<F>(&self, future: F) -> SearchResult<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if !self.is_accepting() {
            return Err(SearchError::PoolUnavailable);
        }
        Ok(self.inner.handle.spawn(future))
    }

    pub fn spawn_blocking<F, R>(&self, f: F) -> SearchResult<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if !self.is_accepting() {
            return Err(SearchError::PoolUnavailable);
        }
        Ok(self.inner.handle.spawn_blocking(f))
    }
}

impl std::fmt::Debug for PoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolExecutor")
            .field("generation", &self.generation())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
