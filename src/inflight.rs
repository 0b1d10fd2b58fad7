//! In-flight request registry and the shared result stream.
//!
//! At most one fetch run is live per key: the first caller spawns the run
//! task, later callers subscribe to its broadcast channel and multiplex
//! onto the same execution. Every subscriber holds an [`Arc`] over the
//! run's guard; when the last subscriber drops its [`DataStream`], the
//! guard aborts the task (reference-counted cancellation). The run removes
//! its own registry entry on termination, keyed by run id so an aborted
//! run can never evict a successor that reused its key.
//!
//! A registry is owned per box by default; pass one registry to several
//! boxes (same output type) to deduplicate across them.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::{BoxKey, DataboxError, Result, telemetry};

/// Broadcast buffer per run. Runs emit at most two values plus a terminal
/// error, so subscribers only lag if they poll pathologically late.
const RUN_CHANNEL_CAPACITY: usize = 16;

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(0);

/// Aborts the run task when the last subscriber drops.
pub(crate) struct RunGuard {
    abort: AbortHandle,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

struct Entry<O> {
    run_id: u64,
    tx: broadcast::Sender<Result<O>>,
    guard: Weak<RunGuard>,
}

/// Process-visible map from key to the currently running shared fetch.
pub struct InFlightRegistry<O> {
    entries: Mutex<HashMap<BoxKey, Entry<O>>>,
}

impl<O: Clone + Send + 'static> InFlightRegistry<O> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live runs.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries
            .values()
            .filter(|e| e.guard.strong_count() > 0)
            .count()
    }

    /// Whether no runs are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Join the live run for `key`, or start one via `spawn`.
    ///
    /// Check-and-insert happens under one lock so two concurrent callers
    /// can never both spawn. `spawn` receives the run id (for
    /// [`complete`](Self::complete)) and the broadcast sender, and must
    /// return the spawned task's abort handle; it runs with the lock held
    /// and must not block.
    pub(crate) fn join_or_run<F>(&self, key: &BoxKey, spawn: F) -> DataStream<O>
    where
        F: FnOnce(u64, broadcast::Sender<Result<O>>) -> AbortHandle,
    {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(entry) = entries.get(key) {
            if let Some(guard) = entry.guard.upgrade() {
                metrics::counter!(telemetry::INFLIGHT_JOINS_TOTAL, "key" => key.as_str().to_owned())
                    .increment(1);
                tracing::debug!(key = %key, "joining in-flight request");
                return DataStream::new(entry.tx.subscribe(), guard);
            }
            // Cancelled run whose cleanup has not landed yet.
            entries.remove(key);
        }

        let run_id = NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = broadcast::channel(RUN_CHANNEL_CAPACITY);
        let abort = spawn(run_id, tx.clone());
        let guard = Arc::new(RunGuard { abort });
        entries.insert(
            key.clone(),
            Entry {
                run_id,
                tx,
                guard: Arc::downgrade(&guard),
            },
        );
        DataStream::new(rx, guard)
    }

    /// Remove the entry for `key` if it still belongs to run `run_id`.
    pub(crate) fn complete(&self, key: &BoxKey, run_id: u64) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.get(key).is_some_and(|e| e.run_id == run_id) {
            entries.remove(key);
        }
    }
}

impl<O: Clone + Send + 'static> Default for InFlightRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared, cancelable stream of converted values from one box run.
///
/// Emits one value (local or fetched), two on the serve-then-refresh path,
/// or one terminal error; then ends. Dropping every `DataStream` of a run
/// cancels its underlying fetch.
pub struct DataStream<O> {
    inner: BroadcastStream<Result<O>>,
    _guard: Arc<RunGuard>,
}

impl<O: Clone + Send + 'static> DataStream<O> {
    fn new(rx: broadcast::Receiver<Result<O>>, guard: Arc<RunGuard>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
            _guard: guard,
        }
    }

    /// Next emitted item, or `None` when the run has completed.
    pub async fn next(&mut self) -> Option<Result<O>> {
        StreamExt::next(self).await
    }

    /// Consume the stream and return its first item.
    ///
    /// Convenience for callers that only want the freshest single value.
    pub async fn into_value(mut self) -> Result<O> {
        match self.next().await {
            Some(result) => result,
            None => Err(DataboxError::Fetch(
                "shared fetch completed without emitting a value".to_owned(),
            )),
        }
    }
}

impl<O: Clone + Send + 'static> Stream for DataStream<O> {
    type Item = Result<O>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(item))) => return Poll::Ready(Some(item)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::warn!(skipped, "subscriber lagged behind shared fetch");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
