//! Per-field search orchestration.
//!
//! ```text
//!            submit_text (long enough)
//!   Idle ───────────────────────────────▶ Debouncing ◀──┐ submit_text
//!    ▲                                       │ fire      │ (re-arm)
//!    │ cancel / short text / failure         ▼           │
//!    ├───────────────────────────────────  Searching ────┘
//!    │                                       │ cache hit or lookup done
//!    │                                       ▼
//!    └───────────────────────────────────  Presenting
//! ```
//!
//! Threading: `submit_text`, `select` and friends are called on the owner
//! (interaction) thread. Timers and lookups run on the shared worker pool.
//! Anything that touches presenter state after a lookup goes back through the
//! `Dispatcher`, and is checked against the field's text *at delivery time*:
//! results whose query no longer matches are dropped.
//!
//! Lock order: `state` → `debounce` → `cache` / `presenter`. Every presenter
//! write happens with `state` held, so the guard's verdict still stands when
//! the write lands. No lock is held while dispatching, since an inline
//! dispatcher runs the task right away.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, warn};

use crate::cache::{CacheStats, RankedResults, SearchCache};
use crate::config::SearchConfig;
use crate::debounce::DebounceScheduler;
use crate::dispatch::{Dispatcher, InlineDispatcher};
use crate::interface::{
    ActionHandler, CandidateItem, DisplayFn, DisplayState, PipelinePhase, QueryProvider,
    SearchError, SearchResult, SearchTextFn, SelectionHandler,
};
use crate::pool::{PoolExecutor, PoolHandle, SharedWorkerPool};
use crate::presenter::{ChangeListener, ResultPresenter};
use crate::ranking::{normalize, rank_candidates, RelevanceScorer};
use crate::ticket::WorkTicket;

/// Mutable per-field state guarded by one mutex.
#[derive(Debug)]
struct FieldSearchState {
    /// Raw text as last submitted by the host
    text: String,
    phase: PipelinePhase,
    /// At most one lookup in flight; replacing it cancels the old one
    in_flight: Option<WorkTicket>,
    /// Bumped on every text change, cancel, selection and dispose
    sequence: u64,
    /// Normalized query whose outcome is already on its way to the presenter
    settled: Option<String>,
}

impl FieldSearchState {
    fn new() -> Self {
        Self {
            text: String::new(),
            phase: PipelinePhase::Idle,
            in_flight: None,
            sequence: 0,
            settled: None,
        }
    }

    fn cancel_in_flight(&mut self) -> bool {
        self.in_flight.take().is_some_and(|ticket| ticket.cancel())
    }
}

struct Hooks<T> {
    provider: Option<Arc<dyn QueryProvider<T>>>,
    display: Option<Arc<DisplayFn<T>>>,
    search_text: Option<Arc<SearchTextFn<T>>>,
    on_select: Option<Arc<SelectionHandler<T>>>,
    on_action: Option<Arc<ActionHandler>>,
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self {
            provider: None,
            display: None,
            search_text: None,
            on_select: None,
            on_action: None,
        }
    }
}

struct FieldInner<T> {
    config: SearchConfig,
    scorer: RelevanceScorer,
    pool: PoolHandle,
    executor: PoolExecutor,
    debounce: DebounceScheduler,
    state: Mutex<FieldSearchState>,
    cache: Mutex<SearchCache<T>>,
    presenter: Mutex<ResultPresenter<T>>,
    hooks: RwLock<Hooks<T>>,
    dispatcher: Arc<dyn Dispatcher>,
    disposed: AtomicBool,
}

/// Search engine behind one type-ahead field.
///
/// Dropping the pipeline disposes it.
pub struct SearchPipeline<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<FieldInner<T>>,
}

impl<T> SearchPipeline<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a field that delivers results inline on the worker thread.
    pub fn new(pool: &SharedWorkerPool, config: SearchConfig) -> SearchResult<Self> {
        Self::with_dispatcher(pool, config, Arc::new(InlineDispatcher))
    }

    /// Create a field that delivers results through `dispatcher`.
    pub fn with_dispatcher(
        pool: &SharedWorkerPool,
        config: SearchConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> SearchResult<Self> {
        let config = config.validated()?;
        let handle = pool.acquire()?;
        let executor = handle.executor().clone();

        let inner = FieldInner {
            scorer: RelevanceScorer::new(config.fuzzy_fallback),
            debounce: DebounceScheduler::new(executor.clone()),
            cache: Mutex::new(SearchCache::new(config.max_cache_entries, config.eviction_order)),
            pool: handle,
            executor,
            state: Mutex::new(FieldSearchState::new()),
            presenter: Mutex::new(ResultPresenter::new()),
            hooks: RwLock::new(Hooks::default()),
            dispatcher,
            disposed: AtomicBool::new(false),
            config,
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Collaborators
    // ─────────────────────────────────────────────────────────────────────────────

    /// Set the lookup. Clears the cache.
    pub fn set_query_provider<P>(&self, provider: P)
    where
        P: QueryProvider<T> + 'static,
    {
        self.inner.hooks.write().provider = Some(Arc::new(provider));
        self.clear_cache();
    }

    /// Set the display formatter. Clears the cache.
    pub fn set_display_fn<F>(&self, display: F)
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.inner.hooks.write().display = Some(Arc::new(display));
        self.clear_cache();
    }

    /// Set the text candidates are matched against (defaults to the display
    /// text). Clears the cache.
    pub fn set_search_text_fn<F>(&self, search_text: F)
    where
        F: Fn(&T) -> String + Send + Sync + 'static,
    {
        self.inner.hooks.write().search_text = Some(Arc::new(search_text));
        self.clear_cache();
    }

    pub fn set_selection_handler<F>(&self, handler: F)
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.inner.hooks.write().on_select = Some(Arc::new(handler));
    }

    pub fn set_action_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.write().on_action = Some(Arc::new(handler));
    }

    /// Called after every presenter change, on the thread that made it (the
    /// dispatcher's thread for deliveries). The listener runs while the field
    /// is locked and must not call back into the pipeline's accessors.
    pub fn set_change_listener<F>(&self, listener: F)
    where
        F: Fn(&ResultPresenter<T>) + Send + Sync + 'static,
    {
        let listener: Arc<ChangeListener<T>> = Arc::new(listener);
        self.inner.presenter.lock().set_listener(Some(listener));
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// The field's text changed. Never fails; problems end up as log lines.
    pub fn submit_text(&self, text: &str) {
        self.inner.submit_text(text);
    }

    /// Re-run the search for the current text right away.
    pub fn retry(&self) {
        self.inner.retry();
    }

    /// Cancel the pending timer and the in-flight lookup.
    pub fn cancel_pending(&self) {
        self.inner.cancel_pending();
    }

    /// Confirm the suggestion at `index`. The selection handler runs once.
    pub fn select(&self, index: usize) -> Option<T> {
        self.inner.select(index)
    }

    /// Invoke the "create new" action handler.
    pub fn trigger_action(&self) {
        if self.inner.is_disposed() {
            return;
        }
        let handler = self.inner.hooks.read().on_action.clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    pub fn clear_cache(&self) {
        self.inner.cache.lock().clear();
    }

    /// Cancel everything and release the worker pool. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn phase(&self) -> PipelinePhase {
        self.inner.state.lock().phase
    }

    pub fn text(&self) -> String {
        self.inner.state.lock().text.clone()
    }

    pub fn suggestions(&self) -> Vec<CandidateItem<T>> {
        self.inner.presenter.lock().suggestions().to_vec()
    }

    pub fn selection(&self) -> Option<T> {
        self.inner.presenter.lock().selection().cloned()
    }

    pub fn display_state(&self) -> DisplayState {
        self.inner.presenter.lock().display_state()
    }

    pub fn status(&self) -> Option<String> {
        self.inner.presenter.lock().status().map(str::to_string)
    }

    /// Presenter revision; increments on every visible change.
    pub fn revision(&self) -> u64 {
        self.inner.presenter.lock().revision()
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.lock().len()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.lock().stats()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    pub fn config(&self) -> &SearchConfig {
        &self.inner.config
    }
}

impl<T> Drop for SearchPipeline<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl<T> FieldInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn long_enough(&self, normalized: &str) -> bool {
        normalized.chars().count() >= self.config.min_query_length.max(1)
    }

    fn submit_text(self: &Arc<Self>, text: &str) {
        if self.is_disposed() {
            return;
        }
        let normalized = normalize(text);

        let mut state = self.state.lock();
        state.text = text.to_string();
        state.sequence += 1;
        if state.cancel_in_flight() {
            debug!("superseded in-flight lookup cancelled");
        }

        if !self.long_enough(&normalized) {
            self.debounce.cancel();
            state.phase = PipelinePhase::Idle;

            let mut presenter = self.presenter.lock();
            if normalized.is_empty() {
                presenter.clear();
            } else {
                presenter.reset();
            }
            return;
        }

        self.arm(&mut state, self.config.debounce_delay());
    }

    fn retry(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let mut state = self.state.lock();
        if !self.long_enough(&normalize(&state.text)) {
            return;
        }
        state.cancel_in_flight();
        self.arm(&mut state, Duration::ZERO);
    }

    /// (Re-)arm the debounce timer. Caller holds the state lock.
    fn arm(self: &Arc<Self>, state: &mut FieldSearchState, delay: Duration) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let armed_at = state.sequence;
        let scheduled = self.debounce.schedule(delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.execute(armed_at);
            }
        });

        match scheduled {
            Ok(()) => state.phase = PipelinePhase::Debouncing,
            Err(e) => {
                warn!(error = %e, "could not arm search debounce timer");
                state.phase = PipelinePhase::Idle;
            }
        }
    }

    /// Debounce fired (on a pool worker). A timer that fired while a newer
    /// keystroke was being recorded yields to that keystroke's own timer.
    fn execute(self: &Arc<Self>, armed_at: u64) {
        if self.is_disposed() {
            return;
        }

        let mut state = self.state.lock();
        if state.sequence != armed_at {
            return;
        }
        let query = normalize(&state.text);
        if !self.long_enough(&query) {
            state.phase = PipelinePhase::Idle;
            return;
        }
        let sequence = state.sequence;
        state.phase = PipelinePhase::Searching;

        if self.config.cache_enabled {
            let hit = self.cache.lock().lookup(&query);
            if let Some(results) = hit {
                debug!(query = %query, count = results.len(), "suggestion cache hit");
                state.phase = PipelinePhase::Presenting;
                state.settled = Some(query.clone());
                drop(state);
                self.deliver_results(query, results);
                return;
            }
            debug!(query = %query, "suggestion cache miss");
        }

        let (provider, display, search_text) = {
            let hooks = self.hooks.read();
            let search_text = hooks.search_text.clone().or_else(|| hooks.display.clone());
            (hooks.provider.clone(), hooks.display.clone(), search_text)
        };
        let (Some(provider), Some(display), Some(search_text)) = (provider, display, search_text)
        else {
            warn!(query = %query, "search field has no query provider or display function");
            state.settled = Some(query.clone());
            drop(state);
            self.deliver_failure(query, "Search is not configured".to_string());
            return;
        };

        let ticket = WorkTicket::new();
        if let Some(previous) = state.in_flight.replace(ticket.clone()) {
            previous.cancel();
        }

        let weak = Arc::downgrade(self);
        let scorer = self.scorer;
        let limit = self.config.max_suggestions;
        let lookup_query = query.clone();
        let lookup_ticket = ticket.clone();

        let spawned = self.executor.spawn(async move {
            let ticket = lookup_ticket;
            let query = lookup_query;
            #[cfg(feature = "perf-log")]
            let t0 = std::time::Instant::now();

            let fetched = tokio::select! {
                biased;
                _ = ticket.token().cancelled() => Err(SearchError::CancelledDuringFlight),
                fetched = provider.query(&query, ticket.token()) => fetched,
            };

            let outcome = match fetched {
                Ok(items) => {
                    let token = ticket.token().clone();
                    let rank_query = query.clone();
                    tokio::task::spawn_blocking(move || {
                        rank_candidates(
                            &scorer,
                            &rank_query,
                            items,
                            &*display,
                            &*search_text,
                            limit,
                            &token,
                        )
                    })
                    .await
                    .map_err(SearchError::from)
                }
                Err(e) => Err(e),
            };

            #[cfg(feature = "perf-log")]
            eprintln!(
                "[perf] query={:?} lookup+rank={:.1}ms ok={}",
                query,
                t0.elapsed().as_secs_f64() * 1000.0,
                outcome.is_ok(),
            );

            if let Some(inner) = weak.upgrade() {
                inner.complete(&ticket, query, outcome);
            }
        });

        match spawned {
            Ok(_) => {
                drop(state);
                self.deliver_begin_search(query, sequence);
            }
            Err(e) => {
                warn!(query = %query, error = %e, "could not submit suggestion lookup");
                state.in_flight = None;
                state.phase = PipelinePhase::Idle;
            }
        }
    }

    /// Lookup finished (on a pool worker). Only the side that wins the ticket
    /// publishes.
    fn complete(
        self: &Arc<Self>,
        ticket: &WorkTicket,
        query: String,
        outcome: SearchResult<Vec<CandidateItem<T>>>,
    ) {
        if !ticket.complete() {
            debug!(query = %query, "lookup cancelled during flight; result dropped");
            return;
        }

        {
            let mut state = self.state.lock();
            if state.in_flight.as_ref().is_some_and(|t| t.same_as(ticket)) {
                state.in_flight = None;
            }
            if !matches!(outcome, Err(SearchError::CancelledDuringFlight)) {
                state.settled = Some(query.clone());
            }
        }

        match outcome {
            Ok(ranked) => {
                let ranked: RankedResults<T> = Arc::new(ranked);
                if self.config.cache_enabled {
                    self.cache.lock().store(&query, Arc::clone(&ranked));
                }
                self.deliver_results(query, ranked);
            }
            Err(SearchError::CancelledDuringFlight) => {
                debug!(query = %query, "provider reported cancellation; result dropped");
                let mut state = self.state.lock();
                if state.in_flight.is_none() && state.phase == PipelinePhase::Searching {
                    state.phase = PipelinePhase::Idle;
                }
            }
            Err(e) => {
                warn!(query = %query, error = %e, "suggestion lookup failed");
                self.deliver_failure(query, e.to_string());
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Owner-thread delivery
    // ─────────────────────────────────────────────────────────────────────────────

    fn on_owner_thread<F>(self: &Arc<Self>, task: F)
    where
        F: FnOnce(&Arc<Self>) + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        self.dispatcher.dispatch(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                task(&inner);
            }
        }));
    }

    fn deliver_begin_search(self: &Arc<Self>, query: String, sequence: u64) {
        self.on_owner_thread(move |inner| {
            if inner.is_disposed() {
                return;
            }
            let state = inner.state.lock();
            if state.sequence != sequence || state.phase != PipelinePhase::Searching {
                return;
            }
            inner.presenter.lock().begin_search(&query);
            drop(state);
        });
    }

    fn deliver_results(self: &Arc<Self>, query: String, results: RankedResults<T>) {
        self.on_owner_thread(move |inner| {
            let Some(_state) = inner.accept_delivery(&query) else {
                return;
            };
            inner.presenter.lock().publish(&query, &results);
        });
    }

    fn deliver_failure(self: &Arc<Self>, query: String, status: String) {
        self.on_owner_thread(move |inner| {
            let Some(mut state) = inner.accept_delivery(&query) else {
                return;
            };
            state.phase = PipelinePhase::Idle;
            inner.presenter.lock().fail(&query, status);
        });
    }

    /// Stale-result guard, evaluated at delivery time. On success the phase
    /// moves to `Presenting` (unless a newer timer is already armed) and the
    /// state guard is handed back so the presenter write happens under it.
    fn accept_delivery(
        self: &Arc<Self>,
        query: &str,
    ) -> Option<MutexGuard<'_, FieldSearchState>> {
        if self.is_disposed() {
            return None;
        }
        let mut state = self.state.lock();
        if state.phase == PipelinePhase::Idle {
            debug!(query = %query, "field went idle; result dropped");
            return None;
        }

        let current = normalize(&state.text);
        if current != query {
            debug!(query = %query, current = %current, "stale suggestion result dropped");
            if self.needs_reevaluation(&state, &current) {
                debug!(current = %current, "re-evaluating current text");
                self.arm(&mut state, self.config.debounce_delay());
            }
            return None;
        }

        if !self.debounce.is_pending() {
            state.phase = PipelinePhase::Presenting;
        }
        Some(state)
    }

    /// Nothing armed, nothing in flight, and no outcome for `current` queued
    /// or shown.
    fn needs_reevaluation(&self, state: &FieldSearchState, current: &str) -> bool {
        if self.debounce.is_pending() || state.in_flight.is_some() {
            return false;
        }
        if state.settled.as_deref() == Some(current) {
            return false;
        }
        self.presenter.lock().query() != Some(current) && self.long_enough(current)
    }

    fn select(self: &Arc<Self>, index: usize) -> Option<T> {
        if self.is_disposed() {
            return None;
        }

        let chosen = {
            let mut state = self.state.lock();
            let chosen = self.presenter.lock().select(index)?;
            self.debounce.cancel();
            state.cancel_in_flight();
            state.text = chosen.display.clone();
            state.phase = PipelinePhase::Idle;
            state.sequence += 1;
            chosen
        };

        let handler = self.hooks.read().on_select.clone();
        if let Some(handler) = handler {
            handler(chosen.payload.clone());
        }
        Some(chosen.payload)
    }

    fn cancel_pending(&self) {
        if self.is_disposed() {
            return;
        }
        let mut state = self.state.lock();
        self.debounce.cancel();
        state.cancel_in_flight();
        state.phase = PipelinePhase::Idle;
        state.sequence += 1;

        let mut presenter = self.presenter.lock();
        if presenter.display_state() == DisplayState::Searching {
            presenter.reset();
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut state = self.state.lock();
            self.debounce.cancel();
            state.cancel_in_flight();
            state.phase = PipelinePhase::Idle;
            state.sequence += 1;
        }
        self.pool.release();
        debug!("search field disposed");
    }
}

impl<T> std::fmt::Debug for SearchPipeline<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SearchPipeline")
            .field("text", &state.text)
            .field("phase", &state.phase)
            .field("in_flight", &state.in_flight.is_some())
            .field("disposed", &self.inner.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::dispatch::QueuedDispatcher;
    use crate::provider::{BlockingProvider, StaticProvider};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Instant;

    const COMPANIES: [&str; 5] = [
        "Acme Corp",
        "Acme Industries",
        "Zenith",
        "Blue Ridge Freight",
        "Ridgeline Logistics",
    ];

    fn pool() -> SharedWorkerPool {
        SharedWorkerPool::new(PoolConfig {
            worker_threads: Some(2),
            ..PoolConfig::default()
        })
    }

    fn fast_config() -> SearchConfig {
        SearchConfig {
            debounce_delay_ms: 30,
            ..SearchConfig::default()
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(3);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    /// Field over the company list with a provider that counts and records calls.
    fn counting_field(
        pool: &SharedWorkerPool,
        config: SearchConfig,
    ) -> (SearchPipeline<String>, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let field = SearchPipeline::new(pool, config).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls_clone = Arc::clone(&calls);
        let seen_clone = Arc::clone(&seen);

        field.set_query_provider(BlockingProvider::new(move |q: &str| -> SearchResult<Vec<String>> {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            seen_clone.lock().push(q.to_string());
            Ok(COMPANIES.iter().map(|s| s.to_string()).collect())
        }));
        field.set_display_fn(|s: &String| s.clone());
        (field, calls, seen)
    }

    fn names(field: &SearchPipeline<String>) -> Vec<String> {
        field.suggestions().into_iter().map(|c| c.display).collect()
    }

    #[test]
    fn test_burst_runs_one_search_with_final_text() {
        let pool = pool();
        let (field, calls, seen) = counting_field(&pool, fast_config());

        for text in ["a", "ac", "acm", "acme"] {
            field.submit_text(text);
            assert_eq!(field.phase(), PipelinePhase::Debouncing);
        }

        assert!(wait_until(|| field.display_state() == DisplayState::Results));
        std::thread::sleep(Duration::from_millis(100));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec!["acme".to_string()]);
        assert_eq!(names(&field), vec!["Acme Corp", "Acme Industries"]);
        assert_eq!(field.phase(), PipelinePhase::Presenting);
    }

    #[test]
    fn test_repeat_query_served_from_cache() {
        let pool = pool();
        let (field, calls, _) = counting_field(&pool, fast_config());

        field.submit_text("ridge");
        assert!(wait_until(|| field.display_state() == DisplayState::Results));
        let first = names(&field);

        field.submit_text("");
        assert_eq!(field.display_state(), DisplayState::NotSearched);

        field.submit_text("  RIDGE ");
        assert!(wait_until(|| field.display_state() == DisplayState::Results));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(names(&field), first);
        assert_eq!(first, vec!["Ridgeline Logistics", "Blue Ridge Freight"]);
        assert_eq!(field.cache_stats().hits, 1);
    }

    #[test]
    fn test_cache_disabled_queries_every_time() {
        let pool = pool();
        let config = SearchConfig { cache_enabled: false, ..fast_config() };
        let (field, calls, _) = counting_field(&pool, config);

        for _ in 0..2 {
            field.submit_text("zen");
            assert!(wait_until(|| field.display_state() == DisplayState::Results));
            field.submit_text("");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(field.cache_len(), 0);
    }

    #[test]
    fn test_short_text_stays_idle() {
        let pool = pool();
        let config = SearchConfig { min_query_length: 3, ..fast_config() };
        let (field, calls, _) = counting_field(&pool, config);

        field.submit_text("ac");
        assert_eq!(field.phase(), PipelinePhase::Idle);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(field.display_state(), DisplayState::NotSearched);
    }

    #[test]
    fn test_whitespace_only_is_idle() {
        let pool = pool();
        let (field, calls, _) = counting_field(&pool, fast_config());
        field.submit_text("   ");
        assert_eq!(field.phase(), PipelinePhase::Idle);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_no_results_state() {
        let pool = pool();
        let (field, _, _) = counting_field(&pool, fast_config());
        field.submit_text("qqqq");
        assert!(wait_until(|| field.display_state() == DisplayState::NoResults));
        assert!(field.suggestions().is_empty());
        assert!(field.status().is_none());
    }

    #[test]
    fn test_max_suggestions_cap() {
        let pool = pool();
        let config = SearchConfig { max_suggestions: 1, ..fast_config() };
        let (field, _, _) = counting_field(&pool, config);
        field.submit_text("acme");
        assert!(wait_until(|| field.display_state() == DisplayState::Results));
        assert_eq!(names(&field), vec!["Acme Corp"]);
    }

    #[test]
    fn test_provider_failure_ends_in_empty_presentation() {
        let pool = pool();
        let field: SearchPipeline<String> = SearchPipeline::new(&pool, fast_config()).unwrap();
        field.set_display_fn(|s: &String| s.clone());
        field.set_query_provider(BlockingProvider::new(|q: &str| -> SearchResult<Vec<String>> {
            Err(SearchError::ProviderFailure(format!("no table for {q}")))
        }));

        field.submit_text("x");
        assert!(wait_until(|| field.display_state() == DisplayState::NoResults));
        assert!(wait_until(|| field.phase() == PipelinePhase::Idle));
        assert!(field.suggestions().is_empty());
        assert!(field.status().unwrap().contains("no table for x"));
        assert_eq!(field.cache_len(), 0);
    }

    #[test]
    fn test_retry_after_failure() {
        let pool = pool();
        let field: SearchPipeline<String> = SearchPipeline::new(&pool, fast_config()).unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);
        field.set_display_fn(|s: &String| s.clone());
        field.set_query_provider(BlockingProvider::new(move |_: &str| -> SearchResult<Vec<String>> {
            if attempts_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SearchError::ProviderFailure("timeout".into()))
            } else {
                Ok(vec!["Zenith".to_string()])
            }
        }));

        field.submit_text("zen");
        assert!(wait_until(|| field.display_state() == DisplayState::NoResults));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "failures are not retried automatically");

        field.retry();
        assert!(wait_until(|| field.display_state() == DisplayState::Results));
        assert_eq!(names(&field), vec!["Zenith"]);
    }

    #[test]
    fn test_missing_provider_is_reported() {
        let pool = pool();
        let field: SearchPipeline<String> = SearchPipeline::new(&pool, fast_config()).unwrap();
        field.submit_text("acme");
        assert!(wait_until(|| field.display_state() == DisplayState::NoResults));
        assert_eq!(field.status().as_deref(), Some("Search is not configured"));
    }

    #[test]
    fn test_cancel_pending_before_fire() {
        let pool = pool();
        let (field, calls, _) = counting_field(&pool, fast_config());
        field.submit_text("acme");
        field.cancel_pending();
        assert_eq!(field.phase(), PipelinePhase::Idle);
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(field.display_state(), DisplayState::NotSearched);
    }

    #[test]
    fn test_typing_during_lookup_cancels_it() {
        let pool = pool();
        let field: SearchPipeline<String> = SearchPipeline::new(&pool, fast_config()).unwrap();
        let (entered_tx, entered_rx) = mpsc::channel::<String>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        field.set_display_fn(|s: &String| s.clone());
        field.set_query_provider(BlockingProvider::new(move |q: &str| -> SearchResult<Vec<String>> {
            entered_tx.send(q.to_string()).unwrap();
            if q == "acme" {
                let _ = release_rx.lock().recv_timeout(Duration::from_secs(3));
            }
            Ok(COMPANIES.iter().map(|s| s.to_string()).collect())
        }));

        field.submit_text("acme");
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(3)).unwrap(), "acme");
        assert!(wait_until(|| field.phase() == PipelinePhase::Searching));

        field.submit_text("zen");
        assert_eq!(field.phase(), PipelinePhase::Debouncing);
        assert_eq!(entered_rx.recv_timeout(Duration::from_secs(3)).unwrap(), "zen");
        assert!(wait_until(|| field.display_state() == DisplayState::Results));
        assert_eq!(names(&field), vec!["Zenith"]);

        // Let the stale lookup finish; its rows must never show up
        release_tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(names(&field), vec!["Zenith"]);
        assert_eq!(field.cache_len(), 1);
    }

    #[test]
    fn test_late_result_dropped_at_delivery() {
        let pool = pool();
        let dispatcher = Arc::new(QueuedDispatcher::new());
        let field: SearchPipeline<String> =
            SearchPipeline::with_dispatcher(&pool, fast_config(), dispatcher.clone()).unwrap();
        field.set_display_fn(|s: &String| s.clone());
        field.set_query_provider(StaticProvider::new(
            COMPANIES.iter().map(|s| s.to_string()).collect(),
        ));

        field.submit_text("acme");
        // begin-search + results both queued for the owner thread
        assert!(wait_until(|| dispatcher.pending() >= 2));

        field.submit_text("zen");
        dispatcher.run_pending();
        assert_eq!(field.display_state(), DisplayState::NotSearched);
        assert!(field.suggestions().is_empty(), "late acme results must be dropped");

        assert!(wait_until(|| dispatcher.pending() >= 2));
        dispatcher.run_pending();
        assert_eq!(names(&field), vec!["Zenith"]);
        assert_eq!(field.phase(), PipelinePhase::Presenting);
    }

    #[test]
    fn test_select_invokes_handler_once() {
        let pool = pool();
        let (field, _, _) = counting_field(&pool, fast_config());
        let selected = Arc::new(Mutex::new(Vec::new()));
        let selected_clone = Arc::clone(&selected);
        field.set_selection_handler(move |s: String| selected_clone.lock().push(s));

        field.submit_text("acme");
        assert!(wait_until(|| field.display_state() == DisplayState::Results));

        assert_eq!(field.select(1), Some("Acme Industries".to_string()));
        assert_eq!(*selected.lock(), vec!["Acme Industries".to_string()]);
        assert_eq!(field.selection(), Some("Acme Industries".to_string()));
        assert!(field.suggestions().is_empty());
        assert_eq!(field.text(), "Acme Industries");
        assert_eq!(field.phase(), PipelinePhase::Idle);

        // Nothing left to select
        assert_eq!(field.select(0), None);
        assert_eq!(selected.lock().len(), 1);

        field.submit_text("");
        assert!(field.selection().is_none());
    }

    #[test]
    fn test_action_handler() {
        let pool = pool();
        let (field, calls, _) = counting_field(&pool, fast_config());
        let actions = Arc::new(AtomicUsize::new(0));
        let actions_clone = Arc::clone(&actions);
        field.set_action_handler(move || {
            actions_clone.fetch_add(1, Ordering::SeqCst);
        });

        field.trigger_action();
        assert_eq!(actions.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_changing_provider_clears_cache() {
        let pool = pool();
        let (field, _, _) = counting_field(&pool, fast_config());
        field.submit_text("acme");
        assert!(wait_until(|| field.cache_len() == 1));

        field.set_query_provider(StaticProvider::new(vec!["Acme Freight".to_string()]));
        assert_eq!(field.cache_len(), 0);
    }

    #[test]
    fn test_clear_cache() {
        let pool = pool();
        let (field, calls, _) = counting_field(&pool, fast_config());
        field.submit_text("acme");
        assert!(wait_until(|| field.display_state() == DisplayState::Results));
        field.clear_cache();
        field.submit_text("");
        field.submit_text("acme");
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2));
    }

    #[test]
    fn test_dispose_is_idempotent_and_final() {
        let pool = pool();
        let (field, calls, _) = counting_field(&pool, fast_config());
        assert_eq!(pool.registrations(), 1);

        field.submit_text("acme");
        field.dispose();
        field.dispose();

        assert!(field.is_disposed());
        assert_eq!(field.phase(), PipelinePhase::Idle);
        assert_eq!(pool.registrations(), 0);
        assert!(!pool.is_active());

        field.submit_text("zen");
        field.retry();
        assert_eq!(field.select(0), None);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(field.phase(), PipelinePhase::Idle);
    }

    #[test]
    fn test_drop_releases_pool() {
        let pool = pool();
        {
            let (_field, _, _) = counting_field(&pool, fast_config());
            assert!(pool.is_active());
        }
        assert!(!pool.is_active());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let pool = pool();
        let config = SearchConfig { max_suggestions: 0, ..SearchConfig::default() };
        let result = SearchPipeline::<String>::new(&pool, config);
        assert!(matches!(result, Err(SearchError::InvalidConfig(_))));
        assert_eq!(pool.registrations(), 0);
    }

    #[test]
    fn test_change_listener_sees_updates() {
        let pool = pool();
        let (field, _, _) = counting_field(&pool, fast_config());
        let states = Arc::new(Mutex::new(Vec::new()));
        let states_clone = Arc::clone(&states);
        field.set_change_listener(move |p: &ResultPresenter<String>| {
            states_clone.lock().push(p.display_state());
        });

        field.submit_text("zen");
        assert!(wait_until(|| field.display_state() == DisplayState::Results));
        let seen = states.lock().clone();
        assert_eq!(seen.last(), Some(&DisplayState::Results));
        assert!(field.revision() >= 1);
    }

    #[test]
    fn test_clear_waits_for_publish_in_progress() {
        let pool = pool();
        let (field, _, _) = counting_field(&pool, fast_config());
        let (entered_tx, entered_rx) = mpsc::channel::<Option<String>>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let gate = Mutex::new(Some((entered_tx, release_rx)));

        // Hold the first publish of results open until the test lets it go
        field.set_change_listener(move |p: &ResultPresenter<String>| {
            if p.display_state() != DisplayState::Results {
                return;
            }
            if let Some((entered, release)) = gate.lock().take() {
                entered.send(p.query().map(str::to_string)).unwrap();
                let _ = release.recv_timeout(Duration::from_secs(3));
            }
        });

        field.submit_text("acme");
        let published_for = entered_rx.recv_timeout(Duration::from_secs(3)).unwrap();
        assert_eq!(published_for.as_deref(), Some("acme"));

        let cleared = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                field.submit_text("");
                cleared.store(true, Ordering::SeqCst);
            });

            std::thread::sleep(Duration::from_millis(50));
            assert!(!cleared.load(Ordering::SeqCst), "clear must wait for the publish");
            release_tx.send(()).unwrap();
        });

        assert!(cleared.load(Ordering::SeqCst));
        assert!(field.suggestions().is_empty());
        assert_eq!(field.display_state(), DisplayState::NotSearched);
        assert_eq!(field.phase(), PipelinePhase::Idle);
    }

    #[test]
    fn test_clear_right_after_typing_never_leaves_results() {
        let pool = pool();
        let config = SearchConfig { debounce_delay_ms: 0, ..SearchConfig::default() };
        let (field, _, _) = counting_field(&pool, config);

        for i in 0..200u64 {
            field.submit_text("acme");
            std::thread::sleep(Duration::from_micros((i % 7) * 150));
            field.submit_text("");
        }
        std::thread::sleep(Duration::from_millis(100));

        assert!(field.suggestions().is_empty());
        assert_eq!(field.display_state(), DisplayState::NotSearched);
        assert_eq!(field.phase(), PipelinePhase::Idle);
    }

    #[test]
    fn test_queued_stale_result_does_not_repeat_lookup() {
        let pool = pool();
        let dispatcher = Arc::new(QueuedDispatcher::new());
        let config = SearchConfig { cache_enabled: false, ..fast_config() };
        let field: SearchPipeline<String> =
            SearchPipeline::with_dispatcher(&pool, config, dispatcher.clone()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        field.set_display_fn(|s: &String| s.clone());
        field.set_query_provider(BlockingProvider::new(move |q: &str| -> SearchResult<Vec<String>> {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(vec![format!("{q} result")])
        }));

        field.submit_text("first");
        assert!(wait_until(|| dispatcher.pending() >= 2));
        field.submit_text("second");
        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2 && dispatcher.pending() >= 4));

        // Stale "first" is drained ahead of the already-queued "second" result
        dispatcher.run_pending();
        std::thread::sleep(Duration::from_millis(120));
        dispatcher.run_pending();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(names(&field), vec!["second result"]);
        assert_eq!(field.phase(), PipelinePhase::Presenting);
    }

    #[test]
    fn test_stale_result_reevaluates_unsearched_text() {
        let pool = pool();
        let config = SearchConfig { debounce_delay_ms: 10_000, ..SearchConfig::default() };
        let (field, calls, _) = counting_field(&pool, config);
        let inner = &field.inner;

        // "zen" was typed but its timer is gone and nothing was looked up
        field.submit_text("zen");
        inner.debounce.cancel();
        assert!(!inner.debounce.is_pending());

        inner.deliver_results("acme".to_string(), Arc::new(Vec::new()));
        assert!(inner.debounce.is_pending(), "current text must be searched again");
        assert_eq!(field.phase(), PipelinePhase::Debouncing);
        assert_eq!(field.display_state(), DisplayState::NotSearched);

        // Once an outcome for "zen" is on its way, a stale result re-arms nothing
        inner.debounce.cancel();
        inner.state.lock().settled = Some("zen".to_string());
        inner.deliver_results("acme".to_string(), Arc::new(Vec::new()));
        assert!(!inner.debounce.is_pending());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
