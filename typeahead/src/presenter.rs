//! Consumer-facing suggestion state: what the dropdown shows and what is
//! selected. Mutated by the pipeline only while it holds the field's state
//! lock: on the owner thread for host calls, on whichever thread runs the
//! dispatcher for deliveries.

use std::sync::Arc;

use crate::interface::{CandidateItem, DisplayState};

/// Called after every change with the presenter's new state.
pub type ChangeListener<T> = dyn Fn(&ResultPresenter<T>) + Send + Sync;

pub struct ResultPresenter<T> {
    suggestions: Vec<CandidateItem<T>>,
    selection: Option<T>,
    display_state: DisplayState,
    /// Normalized query the current suggestions belong to
    query: Option<String>,
    status: Option<String>,
    revision: u64,
    listener: Option<Arc<ChangeListener<T>>>,
}

impl<T: Clone> ResultPresenter<T> {
    pub fn new() -> Self {
        Self {
            suggestions: Vec::new(),
            selection: None,
            display_state: DisplayState::NotSearched,
            query: None,
            status: None,
            revision: 0,
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: Option<Arc<ChangeListener<T>>>) {
        self.listener = listener;
    }

    pub fn suggestions(&self) -> &[CandidateItem<T>] {
        &self.suggestions
    }

    pub fn selection(&self) -> Option<&T> {
        self.selection.as_ref()
    }

    pub fn display_state(&self) -> DisplayState {
        self.display_state
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Human-readable status for the last failure, if any.
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Increments on every change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// A lookup started for `query`. Previous suggestions stay visible.
    pub fn begin_search(&mut self, query: &str) {
        self.display_state = DisplayState::Searching;
        self.query = Some(query.to_string());
        self.status = None;
        self.changed();
    }

    pub fn publish(&mut self, query: &str, results: &[CandidateItem<T>]) {
        self.suggestions = results.to_vec();
        self.display_state = if self.suggestions.is_empty() {
            DisplayState::NoResults
        } else {
            DisplayState::Results
        };
        self.query = Some(query.to_string());
        self.status = None;
        self.changed();
    }

    /// A lookup failed: show an empty list with a status message.
    pub fn fail(&mut self, query: &str, status: String) {
        self.suggestions.clear();
        self.display_state = DisplayState::NoResults;
        self.query = Some(query.to_string());
        self.status = Some(status);
        self.changed();
    }

    /// Back to "not yet searched", keeping the selection.
    pub fn reset(&mut self) {
        self.suggestions.clear();
        self.display_state = DisplayState::NotSearched;
        self.query = None;
        self.status = None;
        self.changed();
    }

    /// Text was cleared: drop suggestions and selection.
    pub fn clear(&mut self) {
        self.selection = None;
        self.reset();
    }

    /// Select the suggestion at `index`. Clears the suggestion list and
    /// returns the selected candidate.
    pub fn select(&mut self, index: usize) -> Option<CandidateItem<T>> {
        if index >= self.suggestions.len() {
            return None;
        }
        let chosen = self.suggestions.swap_remove(index);
        self.selection = Some(chosen.payload.clone());
        self.suggestions.clear();
        self.display_state = DisplayState::NotSearched;
        self.query = None;
        self.status = None;
        self.changed();
        Some(chosen)
    }

    fn changed(&mut self) {
        self.revision += 1;
        if let Some(listener) = self.listener.clone() {
            listener(self);
        }
    }
}

impl<T: Clone> Default for ResultPresenter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ResultPresenter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultPresenter")
            .field("suggestions", &self.suggestions)
            .field("selection", &self.selection)
            .field("display_state", &self.display_state)
            .field("query", &self.query)
            .field("status", &self.status)
            .field("revision", &self.revision)
            .finish()
    }
}
