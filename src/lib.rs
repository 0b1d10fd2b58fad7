//! Databox - client-side cache-aside data orchestration
//!
//! Given a request key, a [`Databox`] decides whether to serve previously
//! stored data or fetch fresh data from a remote producer, validates
//! staleness, persists new data to one or more storage tiers, deduplicates
//! concurrent identical requests, and converts raw values into a
//! caller-specific output type.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use databox::{
//!     AgeValidator, AlwaysValid, Databox, Fetcher, Journal, MemorySource, Result,
//!     RetryStrategy,
//! };
//!
//! struct QuoteFetcher;
//!
//! #[async_trait]
//! impl Fetcher<String> for QuoteFetcher {
//!     async fn fetch(&self) -> Result<String> {
//!         // e.g. an HTTP call
//!         Ok("fresh quote".to_owned())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let journal = Arc::new(Journal::open("/var/cache/databox/journal"));
//!
//!     let quotes: Databox<String, String> = Databox::builder()
//!         .key("quote-of-the-day")
//!         .fetcher(QuoteFetcher)
//!         .source(
//!             MemorySource::new(),
//!             AgeValidator::new(journal.clone(), Duration::from_secs(600)),
//!         )
//!         .journal(journal)
//!         .retry_on_failure(RetryStrategy::default())
//!         .build()?;
//!
//!     // Serves from memory while fresh; fetches, saves, and journals
//!     // otherwise. Concurrent calls share one fetch.
//!     let quote = quotes.get().await?;
//!     println!("{quote}");
//!     Ok(())
//! }
//! ```
//!
//! # Streaming
//!
//! [`Databox::fetch`] returns a [`DataStream`]: one item on the normal
//! path, two on the serve-then-refresh path (`.refresh(true)`), or a
//! single terminal error. The stream is shared — every caller that joins
//! an in-flight run receives the same emissions — and cancelable: the
//! underlying fetch is aborted when the last subscriber drops.

pub mod convert;
pub mod databox;
pub mod error;
pub mod fetcher;
pub mod inflight;
pub mod journal;
pub mod key;
pub mod retry;
pub mod source;
pub mod telemetry;
pub mod validator;

// Re-export main types at crate root
pub use convert::{Converter, ConverterFactory, ConverterRegistry, ErasedConverter, erase_converter};
pub use databox::{Databox, DataboxBuilder};
pub use error::{DataboxError, Result};
pub use fetcher::Fetcher;
pub use inflight::{DataStream, InFlightRegistry};
pub use journal::{DEFAULT_JOURNAL_CAPACITY, Journal};
pub use key::BoxKey;
pub use retry::RetryStrategy;
pub use source::{DiskSource, LocalSource, MemorySource};
pub use validator::{AgeValidator, AlwaysValid, Validator};
