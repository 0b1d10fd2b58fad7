//! The box orchestrator: the cache-aside decision machine.
//!
//! One [`Databox`] binds a validated key to a fetcher, an ordered chain of
//! local tiers, a converter registry, and behaviour flags. Each call to
//! [`Databox::fetch`] runs one decision cycle:
//!
//! 1. **In-flight check** — a live run for the key is joined directly; the
//!    fetch and validation work is not repeated.
//! 2. **Ignore-cache** — when configured, skip the tiers and serve a
//!    retry-wrapped remote fetch (still registered as shared, so concurrent
//!    ignore-cache calls for the same key collapse into one).
//! 3. **Tier scan** — tiers are consulted in priority order; the first
//!    present-and-valid value wins. Present-but-invalid data is cleared
//!    from its tier before the scan moves on, so a stale tier is not
//!    re-validated on every later request.
//! 4. **Serve / refresh / fetch** — a hit is converted and emitted; with
//!    `refresh` set it is followed by a fresh fetch-and-save as a second
//!    item (stale-while-revalidate). A miss goes straight to
//!    fetch-and-save.
//!
//! On every successful fetch the value is saved to all tiers
//! (best-effort), the journal records the fetch time when an age validator
//! is configured, and only then is the converted value emitted.

mod builder;

pub use builder::DataboxBuilder;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::convert::ConverterRegistry;
use crate::inflight::{DataStream, InFlightRegistry};
use crate::journal::unix_millis;
use crate::retry::with_retry;
use crate::{
    BoxKey, Fetcher, Journal, LocalSource, Result, RetryStrategy, Validator, telemetry,
};

/// One configured tier: a local source plus its validator.
pub(crate) struct Tier<R> {
    pub(crate) source: Arc<dyn LocalSource<R>>,
    pub(crate) validator: Arc<dyn Validator<R>>,
}

/// Immutable configuration assembled by the builder.
pub(crate) struct BoxConfig<R, O> {
    pub(crate) key: BoxKey,
    pub(crate) fetcher: Arc<dyn Fetcher<R>>,
    pub(crate) tiers: Vec<Tier<R>>,
    pub(crate) converters: ConverterRegistry<O>,
    pub(crate) journal: Option<Arc<Journal>>,
    pub(crate) ignore_cache: bool,
    pub(crate) refresh: bool,
    pub(crate) retry: Option<RetryStrategy>,
    pub(crate) uses_age_validator: bool,
}

/// Cache-aside orchestrator for one key.
///
/// Cheap to clone; clones share the same configuration and in-flight
/// registry.
///
/// ```rust,no_run
/// # use async_trait::async_trait;
/// # use databox::{Databox, Fetcher, MemorySource, AlwaysValid, Result};
/// # struct UsersFetcher;
/// # #[async_trait]
/// # impl Fetcher<String> for UsersFetcher {
/// #     async fn fetch(&self) -> Result<String> { Ok("users".into()) }
/// # }
/// # #[tokio::main] async fn main() -> Result<()> {
/// let users: Databox<String, String> = Databox::builder()
///     .key("users")
///     .fetcher(UsersFetcher)
///     .source(MemorySource::new(), AlwaysValid)
///     .build()?;
///
/// let value = users.get().await?;
/// # Ok(()) }
/// ```
pub struct Databox<R, O> {
    config: Arc<BoxConfig<R, O>>,
    registry: Arc<InFlightRegistry<O>>,
}

impl<R, O> Clone for Databox<R, O> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R, O> Databox<R, O>
where
    R: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    /// Create a new builder.
    pub fn builder() -> DataboxBuilder<R, O> {
        DataboxBuilder::new()
    }

    pub(crate) fn new(config: BoxConfig<R, O>, registry: Arc<InFlightRegistry<O>>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
        }
    }

    /// The validated key this box serves.
    pub fn key(&self) -> &BoxKey {
        &self.config.key
    }

    /// Run one decision cycle and return the shared result stream.
    ///
    /// When a run for this key is already in flight the returned stream
    /// joins it instead of starting another fetch. Must be called from
    /// within a tokio runtime.
    pub fn fetch(&self) -> DataStream<O> {
        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);
        self.registry.join_or_run(&self.config.key, move |run_id, tx| {
            tokio::spawn(run(config, registry, run_id, tx)).abort_handle()
        })
    }

    /// Convenience: run one cycle and return the first emitted value.
    pub async fn get(&self) -> Result<O> {
        self.fetch().into_value().await
    }
}

/// Removes the run's registry entry on termination, including abort.
struct Cleanup<'a, O: Clone + Send + 'static> {
    registry: &'a InFlightRegistry<O>,
    key: &'a BoxKey,
    run_id: u64,
}

impl<O: Clone + Send + 'static> Drop for Cleanup<'_, O> {
    fn drop(&mut self) {
        self.registry.complete(self.key, self.run_id);
    }
}

async fn run<R, O>(
    config: Arc<BoxConfig<R, O>>,
    registry: Arc<InFlightRegistry<O>>,
    run_id: u64,
    tx: broadcast::Sender<Result<O>>,
) where
    R: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    let _cleanup = Cleanup {
        registry: &registry,
        key: &config.key,
        run_id,
    };
    if let Err(e) = drive(&config, &tx).await {
        let _ = tx.send(Err(e));
    }
}

/// The decision machine proper. Emits converted values through `tx`;
/// a returned error becomes the run's single terminal error.
async fn drive<R, O>(config: &BoxConfig<R, O>, tx: &broadcast::Sender<Result<O>>) -> Result<()>
where
    R: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    if config.ignore_cache {
        debug!(key = %config.key, "ignoring local sources, hitting remote");
        let raw = fetch_remote(config).await?;
        emit(tx, config.converters.resolve(raw)?);
        return Ok(());
    }

    match scan_tiers(config).await {
        Some(local) => {
            debug!(key = %config.key, "serving valid local data");
            emit(tx, config.converters.resolve(local)?);
            if config.refresh {
                debug!(key = %config.key, "refreshing from remote after local serve");
                let raw = fetch_and_save(config).await?;
                emit(tx, config.converters.resolve(raw)?);
            }
        }
        None => {
            debug!(key = %config.key, "no valid local data, fetching and saving");
            let raw = fetch_and_save(config).await?;
            emit(tx, config.converters.resolve(raw)?);
        }
    }
    Ok(())
}

fn emit<O>(tx: &broadcast::Sender<Result<O>>, value: O) {
    // Send only fails when every subscriber is gone; the guard aborts the
    // run shortly after, nothing to do here.
    let _ = tx.send(Ok(value));
}

/// Scan tiers in priority order; first present-and-valid value wins.
/// Present-but-invalid entries are cleared in place; read failures count
/// as misses for that tier.
async fn scan_tiers<R, O>(config: &BoxConfig<R, O>) -> Option<R>
where
    R: Clone + Send + Sync + 'static,
{
    let key = &config.key;
    for tier in &config.tiers {
        let tier_name = tier.source.name().to_owned();
        match tier.source.read(key).await {
            Ok(Some(value)) => {
                if tier.validator.validate(key, &value) {
                    metrics::counter!(telemetry::CACHE_HITS_TOTAL,
                        "key" => key.as_str().to_owned(), "tier" => tier_name.clone())
                    .increment(1);
                    debug!(key = %key, tier = %tier_name, "tier hit");
                    return Some(value);
                }
                metrics::counter!(telemetry::STALE_EVICTIONS_TOTAL,
                    "key" => key.as_str().to_owned(), "tier" => tier_name.clone())
                .increment(1);
                debug!(key = %key, tier = %tier_name, "tier data invalid, clearing");
                if let Err(e) = tier.source.clear(key).await {
                    warn!(key = %key, tier = %tier_name, error = %e, "failed to clear stale tier data");
                }
            }
            Ok(None) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL,
                    "key" => key.as_str().to_owned(), "tier" => tier_name)
                .increment(1);
            }
            Err(e) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL,
                    "key" => key.as_str().to_owned(), "tier" => tier_name.clone())
                .increment(1);
                warn!(key = %key, tier = %tier_name, error = %e, "tier read failed, treating as miss");
            }
        }
    }
    None
}

async fn fetch_remote<R, O>(config: &BoxConfig<R, O>) -> Result<R>
where
    R: Send,
{
    with_retry(config.retry.as_ref(), &config.key, || config.fetcher.fetch()).await
}

/// Fetch fresh data, fan it out to every tier (best-effort), record the
/// fetch time when age validation is in use, and hand the raw value back
/// for conversion. Saves happen before the journal update, which happens
/// before the caller emits.
async fn fetch_and_save<R, O>(config: &BoxConfig<R, O>) -> Result<R>
where
    R: Clone + Send + Sync + 'static,
{
    let raw = fetch_remote(config).await?;

    for tier in &config.tiers {
        if let Err(e) = tier.source.save(&config.key, &raw).await {
            warn!(
                key = %config.key,
                tier = tier.source.name(),
                error = %e,
                "tier save failed, continuing"
            );
        }
    }

    if config.uses_age_validator {
        if let Some(journal) = &config.journal {
            journal.save(&config.key, unix_millis());
        }
    }

    Ok(raw)
}
