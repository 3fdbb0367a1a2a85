//! Typeahead - debounced, cancellable search suggestions for type-ahead fields
//!
//! Every field owns a `SearchPipeline`: keystrokes are debounced, the latest
//! text is looked up through a `QueryProvider`, candidates are ranked by
//! `RelevanceScorer` and cached per normalized query, and the results land in
//! a `ResultPresenter` on the owner thread. All fields share one lazily
//! started, ref-counted `SharedWorkerPool`.

pub mod cache;
pub mod config;
pub mod database;
pub mod debounce;
pub mod dispatch;
pub mod interface;
pub mod pipeline;
pub mod pool;
pub mod presenter;
pub mod provider;
pub mod ranking;
mod ticket;

pub use cache::{CacheStats, SearchCache};
pub use config::{EvictionOrder, PoolConfig, SearchConfig};
pub use database::SqliteProvider;
pub use dispatch::{Dispatcher, InlineDispatcher, QueuedDispatcher};
pub use interface::*;
pub use pipeline::SearchPipeline;
pub use pool::{PoolExecutor, PoolHandle, SharedWorkerPool};
pub use presenter::ResultPresenter;
pub use provider::{BlockingProvider, FnProvider, StaticProvider};
pub use ranking::RelevanceScorer;
pub use ticket::WorkTicket;
