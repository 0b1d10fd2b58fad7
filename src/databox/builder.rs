//! Builder for configuring box instances.

use std::sync::Arc;

use super::{BoxConfig, Databox, Tier};
use crate::convert::{ConverterFactory, ConverterRegistry};
use crate::inflight::InFlightRegistry;
use crate::{
    BoxKey, Converter, DataboxError, Fetcher, Journal, LocalSource, Result, RetryStrategy,
    Validator,
};

/// Fluent builder for [`Databox`]. Accumulates configuration and
/// validates everything eagerly in [`build()`](Self::build):
/// the key must match `[a-z0-9_-]{1,120}`, a fetcher is required, and a
/// journal must be provided whenever any validator depends on one.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use async_trait::async_trait;
/// # use databox::*;
/// # #[derive(Clone, serde::Serialize, serde::Deserialize)] struct UsersRes;
/// # #[derive(Clone)] struct Users;
/// # impl Users { fn from_res(_: UsersRes) -> Self { Users } }
/// # struct UsersFetcher;
/// # #[async_trait]
/// # impl Fetcher<UsersRes> for UsersFetcher {
/// #     async fn fetch(&self) -> Result<UsersRes> { Ok(UsersRes) }
/// # }
/// # #[tokio::main] async fn main() -> Result<()> {
/// let journal = Arc::new(Journal::open("/var/cache/databox/journal"));
///
/// let users: Databox<UsersRes, Users> = Databox::builder()
///     .key("get_users")
///     .fetcher(UsersFetcher)
///     .source(MemorySource::new(), AlwaysValid)
///     .source(
///         DiskSource::new("/var/cache/databox/users"),
///         AgeValidator::new(journal.clone(), Duration::from_secs(300)),
///     )
///     .journal(journal)
///     .converter(|res: UsersRes| Some(Users::from_res(res)))
///     .retry_on_failure(RetryStrategy::default())
///     .build()?;
/// # Ok(()) }
/// ```
pub struct DataboxBuilder<R, O> {
    key: Option<String>,
    fetcher: Option<Arc<dyn Fetcher<R>>>,
    tiers: Vec<Tier<R>>,
    converters: ConverterRegistry<O>,
    journal: Option<Arc<Journal>>,
    ignore_cache: bool,
    refresh: bool,
    retry: Option<RetryStrategy>,
    registry: Option<Arc<InFlightRegistry<O>>>,
}

impl<R, O> DataboxBuilder<R, O>
where
    R: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            key: None,
            fetcher: None,
            tiers: Vec::new(),
            converters: ConverterRegistry::new(),
            journal: None,
            ignore_cache: false,
            refresh: false,
            retry: None,
            registry: None,
        }
    }

    /// Set the key identifying this box's resource.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the remote fetcher.
    pub fn fetcher(mut self, fetcher: impl Fetcher<R> + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Add a local tier with its validator. Repeatable; order is priority
    /// order, first present-and-valid tier wins.
    pub fn source(
        mut self,
        source: impl LocalSource<R> + 'static,
        validator: impl Validator<R> + 'static,
    ) -> Self {
        self.tiers.push(Tier {
            source: Arc::new(source),
            validator: Arc::new(validator),
        });
        self
    }

    /// Register a converter for values of source type `I`. Repeatable.
    pub fn converter<I, C>(mut self, converter: C) -> Self
    where
        I: Send + 'static,
        C: Converter<I, O> + 'static,
    {
        self.converters.add(converter);
        self
    }

    /// Install a converter factory consulted before statically registered
    /// converters.
    pub fn converter_factory(mut self, factory: impl ConverterFactory<O> + 'static) -> Self {
        self.converters.set_factory(Arc::new(factory));
        self
    }

    /// Skip local tiers entirely and always hit the remote producer.
    /// Concurrent calls for the same key still share one fetch.
    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.ignore_cache = ignore;
        self
    }

    /// After serving valid local data, fetch fresh data and emit it as a
    /// second item (stale-while-revalidate).
    pub fn refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Retry failing fetches per `strategy`.
    pub fn retry_on_failure(mut self, strategy: RetryStrategy) -> Self {
        self.retry = Some(strategy);
        self
    }

    /// Provide the journal that records fetch times.
    ///
    /// Required when any configured validator is journal-backed; pass the
    /// same journal the validators were built over.
    pub fn journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Share an in-flight registry across boxes. Defaults to a registry
    /// owned by this box alone.
    pub fn in_flight(mut self, registry: Arc<InFlightRegistry<O>>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Validate the configuration and build the box.
    pub fn build(self) -> Result<Databox<R, O>> {
        let key = self
            .key
            .ok_or_else(|| DataboxError::Configuration("a key is required".to_owned()))?;
        let key = BoxKey::new(key)?;

        let fetcher = self
            .fetcher
            .ok_or_else(|| DataboxError::Configuration("a fetcher is required".to_owned()))?;

        let uses_age_validator = self.tiers.iter().any(|t| t.validator.requires_journal());
        if uses_age_validator && self.journal.is_none() {
            return Err(DataboxError::Configuration(
                "an age validator is configured but no journal was provided".to_owned(),
            ));
        }

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(InFlightRegistry::new()));

        Ok(Databox::new(
            BoxConfig {
                key,
                fetcher,
                tiers: self.tiers,
                converters: self.converters,
                journal: self.journal,
                ignore_cache: self.ignore_cache,
                refresh: self.refresh,
                retry: self.retry,
                uses_age_validator,
            },
            registry,
        ))
    }
}

impl<R, O> Default for DataboxBuilder<R, O>
where
    R: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
