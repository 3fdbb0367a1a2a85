//! Ready-made `QueryProvider` adapters.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::interface::{QueryProvider, SearchError, SearchResult};

/// Runs a synchronous lookup closure on the blocking thread pool.
pub struct BlockingProvider<F> {
    lookup: Arc<F>,
}

impl<F> BlockingProvider<F> {
    pub fn new(lookup: F) -> Self {
        Self { lookup: Arc::new(lookup) }
    }
}

#[async_trait]
impl<T, F> QueryProvider<T> for BlockingProvider<F>
where
    T: Send + 'static,
    F: Fn(&str) -> SearchResult<Vec<T>> + Send + Sync + 'static,
{
    async fn query(&self, query: &str, cancel: &CancellationToken) -> SearchResult<Vec<T>> {
        if cancel.is_cancelled() {
            return Err(SearchError::CancelledDuringFlight);
        }
        let lookup = Arc::clone(&self.lookup);
        let query = query.to_string();
        tokio::task::spawn_blocking(move || lookup(&query)).await?
    }
}

/// Wraps an async closure returning a boxed future.
pub struct FnProvider<F> {
    lookup: F,
}

impl<F> FnProvider<F> {
    pub fn new(lookup: F) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl<T, F> QueryProvider<T> for FnProvider<F>
where
    T: Send + 'static,
    F: Fn(String, CancellationToken) -> BoxFuture<'static, SearchResult<Vec<T>>> + Send + Sync,
{
    async fn query(&self, query: &str, cancel: &CancellationToken) -> SearchResult<Vec<T>> {
        (self.lookup)(query.to_string(), cancel.clone()).await
    }
}

/// A fixed in-memory candidate list. Every item is returned; ranking does the
/// filtering.
#[derive(Debug, Clone)]
pub struct StaticProvider<T> {
    items: Arc<Vec<T>>,
}

impl<T> StaticProvider<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items: Arc::new(items) }
    }
}

#[async_trait]
impl<T> QueryProvider<T> for StaticProvider<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn query(&self, _query: &str, _cancel: &CancellationToken) -> SearchResult<Vec<T>> {
        Ok(self.items.as_ref().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_blocking_provider_runs_closure() {
        let provider = BlockingProvider::new(|q: &str| -> SearchResult<Vec<String>> { Ok(vec![format!("{q}!")]) });
        let result = provider.query("acme", &CancellationToken::new()).await.unwrap();
        assert_eq!(result, vec!["acme!".to_string()]);
    }

    #[tokio::test]
    async fn test_blocking_provider_propagates_failure() {
        let provider = BlockingProvider::new(|_: &str| -> SearchResult<Vec<String>> {
            Err(SearchError::ProviderFailure("db down".into()))
        });
        let err = provider.query("x", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, SearchError::ProviderFailure("db down".into()));
    }

    #[tokio::test]
    async fn test_blocking_provider_skips_when_cancelled() {
        let provider = BlockingProvider::new(|_: &str| -> SearchResult<Vec<String>> {
            panic!("lookup must not run")
        });
        let token = CancellationToken::new();
        token.cancel();
        let err = provider.query("x", &token).await.unwrap_err();
        assert_eq!(err, SearchError::CancelledDuringFlight);
    }

    #[tokio::test]
    async fn test_blocking_provider_panic_becomes_failure() {
        let provider = BlockingProvider::new(|_: &str| -> SearchResult<Vec<String>> {
            panic!("boom")
        });
        let err = provider.query("x", &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SearchError::ProviderFailure(_)));
    }

    #[tokio::test]
    async fn test_fn_provider() {
        let provider = FnProvider::new(|q: String, _cancel: CancellationToken| {
            async move { Ok::<_, SearchError>(vec![q.len()]) }.boxed()
        });
        let result = provider.query("four", &CancellationToken::new()).await.unwrap();
        assert_eq!(result, vec![4]);
    }

    #[tokio::test]
    async fn test_static_provider_returns_everything() {
        let provider = StaticProvider::new(vec!["Acme", "Zenith"]);
        let result = provider.query("acme", &CancellationToken::new()).await.unwrap();
        assert_eq!(result, vec!["Acme", "Zenith"]);
    }
}
