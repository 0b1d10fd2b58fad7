//! Tests for the [`Databox`] decision cycle: tier priority, stale
//! clearing, serve-then-refresh, ignore-cache, deduplication, conversion
//! and cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use databox::{
    AlwaysValid, BoxKey, Databox, DataboxError, Fetcher, InFlightRegistry, Journal, LocalSource,
    Result, Validator,
};

/// In-memory single-slot source that counts every call and can be told to
/// fail reads or saves.
struct FakeSource {
    value: std::sync::Mutex<Option<String>>,
    reads: AtomicU32,
    saves: AtomicU32,
    clears: AtomicU32,
    fail_reads: AtomicBool,
    fail_saves: AtomicBool,
}

impl FakeSource {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            value: std::sync::Mutex::new(None),
            reads: AtomicU32::new(0),
            saves: AtomicU32::new(0),
            clears: AtomicU32::new(0),
            fail_reads: AtomicBool::new(false),
            fail_saves: AtomicBool::new(false),
        })
    }

    fn holding(value: &str) -> Arc<Self> {
        let source = Self::empty();
        *source.value.lock().unwrap() = Some(value.to_owned());
        source
    }

    fn stored(&self) -> Option<String> {
        self.value.lock().unwrap().clone()
    }

    fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    fn saves(&self) -> u32 {
        self.saves.load(Ordering::SeqCst)
    }

    fn clears(&self) -> u32 {
        self.clears.load(Ordering::SeqCst)
    }

    fn error(&self) -> DataboxError {
        DataboxError::Storage {
            source: "fake".to_owned(),
            message: "induced failure".to_owned(),
        }
    }
}

#[async_trait]
impl LocalSource<String> for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn read(&self, _key: &BoxKey) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(self.error());
        }
        Ok(self.stored())
    }

    async fn save(&self, _key: &BoxKey, value: &String) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(self.error());
        }
        *self.value.lock().unwrap() = Some(value.clone());
        Ok(())
    }

    async fn clear(&self, _key: &BoxKey) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        *self.value.lock().unwrap() = None;
        Ok(())
    }
}

/// Validator whose verdict is a shared switch.
#[derive(Clone)]
struct SwitchValidator(Arc<AtomicBool>);

impl SwitchValidator {
    fn invalid() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
}

impl Validator<String> for SwitchValidator {
    fn validate(&self, _key: &BoxKey, _value: &String) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts calls, then returns a fixed value after an optional delay.
struct CountingFetcher {
    calls: Arc<AtomicU32>,
    value: String,
    delay: Option<Duration>,
}

impl CountingFetcher {
    fn new(value: &str) -> (Self, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Self {
                calls: calls.clone(),
                value: value.to_owned(),
                delay: None,
            },
            calls,
        )
    }

    fn slow(value: &str, delay: Duration) -> (Self, Arc<AtomicU32>) {
        let (mut fetcher, calls) = Self::new(value);
        fetcher.delay = Some(delay);
        (fetcher, calls)
    }
}

#[async_trait]
impl Fetcher<String> for CountingFetcher {
    async fn fetch(&self) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.value.clone())
    }
}

struct FailingFetcher;

#[async_trait]
impl Fetcher<String> for FailingFetcher {
    async fn fetch(&self) -> Result<String> {
        Err(DataboxError::Fetch("remote down".into()))
    }
}

#[tokio::test]
async fn miss_fetches_and_saves_to_all_tiers() {
    let (fetcher, calls) = CountingFetcher::new("fresh");
    let first = FakeSource::empty();
    let second = FakeSource::empty();

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(first.clone(), AlwaysValid)
        .source(second.clone(), AlwaysValid)
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.stored(), Some("fresh".to_owned()));
    assert_eq!(second.stored(), Some("fresh".to_owned()));
}

#[tokio::test]
async fn first_valid_tier_wins_and_is_left_untouched() {
    let (fetcher, calls) = CountingFetcher::new("fresh");
    let first = FakeSource::empty();
    let second = FakeSource::holding("from-second");
    let third = FakeSource::holding("from-third");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(first.clone(), AlwaysValid)
        .source(second.clone(), AlwaysValid)
        .source(third.clone(), AlwaysValid)
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "from-second");
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // The scan stops at the winning tier.
    assert_eq!(first.reads(), 1);
    assert_eq!(second.reads(), 1);
    assert_eq!(third.reads(), 0);

    // A hit neither clears nor re-saves anything.
    assert_eq!(second.saves(), 0);
    assert_eq!(second.clears(), 0);
}

#[tokio::test]
async fn invalid_tier_data_is_cleared_before_fetching() {
    let (fetcher, calls) = CountingFetcher::new("fresh");
    let source = FakeSource::holding("stale");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(source.clone(), SwitchValidator::invalid())
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.clears(), 1);

    // The fetched value is fanned back out to the cleared tier.
    assert_eq!(source.stored(), Some("fresh".to_owned()));
}

#[tokio::test]
async fn failing_read_counts_as_miss() {
    let (fetcher, calls) = CountingFetcher::new("fresh");
    let broken = FakeSource::holding("unreachable");
    broken.fail_reads.store(true, Ordering::SeqCst);

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(broken.clone(), AlwaysValid)
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(broken.clears(), 0);
}

#[tokio::test]
async fn failing_save_does_not_block_emission() {
    let (fetcher, _calls) = CountingFetcher::new("fresh");
    let broken = FakeSource::empty();
    broken.fail_saves.store(true, Ordering::SeqCst);

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(broken.clone(), AlwaysValid)
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "fresh");
    assert_eq!(broken.saves(), 1);
    assert_eq!(broken.stored(), None);
}

#[tokio::test]
async fn no_sources_always_fetches() {
    let (fetcher, calls) = CountingFetcher::new("fresh");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "fresh");
    assert_eq!(databox.get().await.unwrap(), "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn refresh_emits_local_then_fresh() {
    let (fetcher, calls) = CountingFetcher::new("fresh");
    let source = FakeSource::holding("cached");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(source.clone(), AlwaysValid)
        .refresh(true)
        .build()
        .unwrap();

    let mut stream = databox.fetch();
    assert_eq!(stream.next().await.unwrap().unwrap(), "cached");
    assert_eq!(stream.next().await.unwrap().unwrap(), "fresh");
    assert!(stream.next().await.is_none());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.stored(), Some("fresh".to_owned()));
}

#[tokio::test]
async fn refresh_on_miss_emits_once() {
    let (fetcher, calls) = CountingFetcher::new("fresh");
    let source = FakeSource::empty();

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(source.clone(), AlwaysValid)
        .refresh(true)
        .build()
        .unwrap();

    let mut stream = databox.fetch();
    assert_eq!(stream.next().await.unwrap().unwrap(), "fresh");
    assert!(stream.next().await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn refresh_failure_still_serves_local_first() {
    let source = FakeSource::holding("cached");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(FailingFetcher)
        .source(source.clone(), AlwaysValid)
        .refresh(true)
        .build()
        .unwrap();

    let mut stream = databox.fetch();
    assert_eq!(stream.next().await.unwrap().unwrap(), "cached");
    assert!(matches!(
        stream.next().await.unwrap(),
        Err(DataboxError::Fetch(_))
    ));
}

#[tokio::test]
async fn ignore_cache_skips_tiers_entirely() {
    let (fetcher, calls) = CountingFetcher::new("fresh");
    let source = FakeSource::holding("cached");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(source.clone(), AlwaysValid)
        .ignore_cache(true)
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Sources are neither consulted nor updated.
    assert_eq!(source.reads(), 0);
    assert_eq!(source.saves(), 0);
    assert_eq!(source.stored(), Some("cached".to_owned()));
}

#[tokio::test]
async fn concurrent_calls_share_one_fetch() {
    let (fetcher, calls) = CountingFetcher::slow("fresh", Duration::from_millis(20));

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .build()
        .unwrap();

    let first = databox.fetch();
    let second = databox.fetch();
    let (a, b) = tokio::join!(first.into_value(), second.into_value());

    assert_eq!(a.unwrap(), "fresh");
    assert_eq!(b.unwrap(), "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sequential_calls_start_fresh_cycles() {
    let (fetcher, calls) = CountingFetcher::new("fresh");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .build()
        .unwrap();

    databox.get().await.unwrap();
    databox.get().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn shared_registry_deduplicates_across_clones() {
    let (fetcher, calls) = CountingFetcher::slow("fresh", Duration::from_millis(20));
    let registry = Arc::new(InFlightRegistry::new());

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .in_flight(registry.clone())
        .build()
        .unwrap();
    let alias = databox.clone();

    let first = databox.fetch();
    let second = alias.fetch();
    assert_eq!(registry.len(), 1);

    let (a, b) = tokio::join!(first.into_value(), second.into_value());
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_every_stream_cancels_the_run() {
    let (fetcher, calls) = CountingFetcher::slow("fresh", Duration::from_secs(3_600));
    let registry = Arc::new(InFlightRegistry::new());

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .in_flight(registry.clone())
        .build()
        .unwrap();

    let stream = databox.fetch();
    tokio::task::yield_now().await;
    assert_eq!(registry.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    drop(stream);
    tokio::task::yield_now().await;
    assert!(registry.is_empty());

    // A later call starts a brand-new run rather than joining a corpse.
    assert_eq!(databox.get().await.unwrap(), "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn one_remaining_subscriber_keeps_the_run_alive() {
    let (fetcher, calls) = CountingFetcher::slow("fresh", Duration::from_secs(30));

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .build()
        .unwrap();

    let first = databox.fetch();
    let second = databox.fetch();
    drop(first);

    assert_eq!(second.into_value().await.unwrap(), "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn converter_maps_source_type_to_output() {
    let calls = Arc::new(AtomicU32::new(0));

    struct NumberFetcher(Arc<AtomicU32>);

    #[async_trait]
    impl Fetcher<u32> for NumberFetcher {
        async fn fetch(&self) -> Result<u32> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(41)
        }
    }

    let databox: Databox<u32, String> = Databox::builder()
        .key("answer")
        .fetcher(NumberFetcher(calls.clone()))
        .converter(|n: u32| Some((n + 1).to_string()))
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "42");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn converter_yielding_nothing_is_a_terminal_error() {
    let (fetcher, _calls) = CountingFetcher::new("unconvertible");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .converter(|_: String| None::<String>)
        .build()
        .unwrap();

    assert!(matches!(
        databox.get().await,
        Err(DataboxError::Conversion { .. })
    ));
}

#[tokio::test]
async fn identity_conversion_applies_without_converters() {
    let (fetcher, _calls) = CountingFetcher::new("as-is");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .build()
        .unwrap();

    assert_eq!(databox.get().await.unwrap(), "as-is");
}

#[tokio::test]
async fn fetch_updates_journal_only_with_age_validation() {
    use databox::AgeValidator;

    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(Journal::open(dir.path()));
    let (fetcher, _calls) = CountingFetcher::new("fresh");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(
            FakeSource::empty(),
            AgeValidator::new(journal.clone(), Duration::from_secs(60)),
        )
        .journal(journal.clone())
        .build()
        .unwrap();

    assert!(journal.read(databox.key()).is_none());
    databox.get().await.unwrap();
    assert!(journal.read(databox.key()).is_some());
}

#[tokio::test]
async fn fetch_leaves_journal_alone_without_age_validation() {
    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(Journal::open(dir.path()));
    let (fetcher, _calls) = CountingFetcher::new("fresh");

    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(FakeSource::empty(), AlwaysValid)
        .journal(journal.clone())
        .build()
        .unwrap();

    databox.get().await.unwrap();
    assert!(journal.is_empty());
}

#[tokio::test]
async fn fetch_error_is_terminal_for_every_subscriber() {
    let databox: Databox<String, String> = Databox::builder()
        .key("users")
        .fetcher(FailingFetcher)
        .build()
        .unwrap();

    let first = databox.fetch();
    let second = databox.fetch();
    let (a, b) = tokio::join!(first.into_value(), second.into_value());

    assert!(matches!(a, Err(DataboxError::Fetch(_))));
    assert!(matches!(b, Err(DataboxError::Fetch(_))));
}

#[tokio::test]
async fn builder_rejects_missing_key() {
    let (fetcher, _calls) = CountingFetcher::new("x");
    let result: Result<Databox<String, String>> = Databox::builder().fetcher(fetcher).build();
    assert!(matches!(result, Err(DataboxError::Configuration(_))));
}

#[tokio::test]
async fn builder_rejects_invalid_key() {
    let (fetcher, _calls) = CountingFetcher::new("x");
    let result: Result<Databox<String, String>> =
        Databox::builder().key("Not Valid!").fetcher(fetcher).build();
    assert!(matches!(result, Err(DataboxError::InvalidKey { .. })));
}

#[tokio::test]
async fn builder_rejects_missing_fetcher() {
    let result: Result<Databox<String, String>> = Databox::builder().key("users").build();
    assert!(matches!(result, Err(DataboxError::Configuration(_))));
}

#[tokio::test]
async fn builder_rejects_age_validation_without_journal() {
    use databox::AgeValidator;

    let dir = tempfile::tempdir().unwrap();
    let journal = Arc::new(Journal::open(dir.path()));
    let (fetcher, _calls) = CountingFetcher::new("x");

    let result: Result<Databox<String, String>> = Databox::builder()
        .key("users")
        .fetcher(fetcher)
        .source(
            FakeSource::empty(),
            AgeValidator::new(journal, Duration::from_secs(60)),
        )
        .build();
    assert!(matches!(result, Err(DataboxError::Configuration(_))));
}
