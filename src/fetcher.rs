//! Remote fetcher contract.

use async_trait::async_trait;

use crate::Result;

/// Produces raw remote data for a key-bound request.
///
/// The orchestrator invokes `fetch()` fresh on every attempt, including
/// retries, so implementations must not cache a half-consumed request.
/// Transport details (HTTP client, endpoints, auth) live entirely in the
/// implementation; the orchestrator only sees the produced value or a
/// [`DataboxError::Fetch`](crate::DataboxError::Fetch) failure.
///
/// ```rust
/// # use async_trait::async_trait;
/// # use databox::{Fetcher, Result};
/// struct StaticFetcher;
///
/// #[async_trait]
/// impl Fetcher<String> for StaticFetcher {
///     async fn fetch(&self) -> Result<String> {
///         Ok("fresh".to_owned())
///     }
/// }
/// ```
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    /// Fetch one fresh value from the remote producer.
    async fn fetch(&self) -> Result<T>;
}

#[async_trait]
impl<T, F> Fetcher<T> for std::sync::Arc<F>
where
    F: Fetcher<T> + ?Sized,
{
    async fn fetch(&self) -> Result<T> {
        (**self).fetch().await
    }
}
