//! Typeahead Interface Definition
//!
//! Shared types exposed to the host application: the ranked candidate record,
//! pipeline/display states, the error taxonomy and the provider contract.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ═══════════════════════════════════════════════════════════════════════════════
// ENUMS
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-field pipeline state.
///
/// `Idle` is reachable from every state via cancellation or short/empty input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelinePhase {
    /// No text (or text below the minimum length); nothing scheduled
    Idle,
    /// Text changed, debounce timer armed
    Debouncing,
    /// Timer fired, lookup in flight
    Searching,
    /// Results for the current text are on display
    Presenting,
}

/// What the suggestion list should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayState {
    /// No search has run for the current text
    NotSearched,
    /// A lookup is in flight
    Searching,
    /// At least one suggestion is available
    Results,
    /// A search completed with nothing to show (or failed)
    NoResults,
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECORDS
// ═══════════════════════════════════════════════════════════════════════════════

/// A ranked suggestion.
///
/// Equality is payload identity: two candidates with the same display text but
/// different underlying records are different candidates.
#[derive(Debug, Clone)]
pub struct CandidateItem<T> {
    pub payload: T,
    pub display: String,
    /// Relevance score, higher = better. Never zero in a ranked list.
    pub score: f64,
}

impl<T> CandidateItem<T> {
    pub fn new(payload: T, display: String, score: f64) -> Self {
        Self { payload, display, score }
    }
}

impl<T: PartialEq> PartialEq for CandidateItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.payload == other.payload
    }
}

/// Error type for typeahead operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("Query provider failed: {0}")]
    ProviderFailure(String),
    #[error("Worker pool is unavailable (shut down or shutting down)")]
    PoolUnavailable,
    #[error("Lookup cancelled during flight")]
    CancelledDuringFlight,
    #[error("Worker pool failed to start: {0}")]
    PoolStartup(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type SearchResult<T> = Result<T, SearchError>;

// ═══════════════════════════════════════════════════════════════════════════════
// PROVIDER INTERFACE
// ═══════════════════════════════════════════════════════════════════════════════

/// The lookup a search field runs on a cache miss (database search, etc).
///
/// `cancel` fires when the lookup is superseded; honoring it is optional but
/// lets a provider stop early. Results for a cancelled lookup are discarded
/// regardless. There is no built-in timeout: a provider that never completes
/// leaves its field in `Searching` until the next keystroke.
#[async_trait]
pub trait QueryProvider<T>: Send + Sync {
    async fn query(&self, query: &str, cancel: &CancellationToken) -> SearchResult<Vec<T>>;
}

/// Formats a payload for display (also the default match text).
pub type DisplayFn<T> = dyn Fn(&T) -> String + Send + Sync;
/// Extracts the text a payload is matched against.
pub type SearchTextFn<T> = dyn Fn(&T) -> String + Send + Sync;
/// Invoked once per confirmed selection.
pub type SelectionHandler<T> = dyn Fn(T) + Send + Sync;
/// Invoked for the auxiliary "create new" action.
pub type ActionHandler = dyn Fn() + Send + Sync;

impl From<rusqlite::Error> for SearchError {
    fn from(e: rusqlite::Error) -> Self {
        SearchError::ProviderFailure(e.to_string())
    }
}

impl From<r2d2::Error> for SearchError {
    fn from(e: r2d2::Error) -> Self {
        SearchError::ProviderFailure(format!("Connection pool error: {}", e))
    }
}

impl From<tokio::task::JoinError> for SearchError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            SearchError::CancelledDuringFlight
        } else {
            SearchError::ProviderFailure(format!("Lookup task panicked: {}", e))
        }
    }
}
