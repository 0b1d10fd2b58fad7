//! Staleness validators.

use std::sync::Arc;
use std::time::Duration;

use crate::journal::unix_millis;
use crate::{BoxKey, Journal};

/// Decides whether data read from a local source is still usable.
///
/// Validators run on the hot read path and must be cheap; anything that
/// needs I/O belongs in the source itself. A tier whose value fails
/// validation is actively cleared before the scan moves on.
pub trait Validator<T>: Send + Sync {
    /// Whether `value` stored under `key` is still usable.
    fn validate(&self, key: &BoxKey, value: &T) -> bool;

    /// Whether this validator's verdicts depend on the journal.
    ///
    /// When any configured validator returns `true`, the orchestrator
    /// records the fetch time in the journal after every successful fetch.
    fn requires_journal(&self) -> bool {
        false
    }
}

impl<T, V> Validator<T> for Arc<V>
where
    V: Validator<T> + ?Sized,
{
    fn validate(&self, key: &BoxKey, value: &T) -> bool {
        self.as_ref().validate(key, value)
    }

    fn requires_journal(&self) -> bool {
        self.as_ref().requires_journal()
    }
}

/// Validator that accepts everything. Useful for tiers whose contents
/// never go stale (e.g. a persistent tier refreshed only by explicit
/// fetches).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysValid;

impl<T> Validator<T> for AlwaysValid {
    fn validate(&self, _key: &BoxKey, _value: &T) -> bool {
        true
    }
}

/// Validator that expires data once its recorded fetch time is older
/// than a TTL.
///
/// Fail-open: a key with no journal entry is treated as valid — a
/// first-ever write has no age to violate. This default is deliberate.
///
/// ```rust,no_run
/// # use std::sync::Arc;
/// # use std::time::Duration;
/// # use databox::{AgeValidator, Journal};
/// let journal = Arc::new(Journal::open("/var/cache/databox/journal"));
/// let validator = AgeValidator::new(journal, Duration::from_secs(300));
/// ```
pub struct AgeValidator {
    journal: Arc<Journal>,
    ttl: Duration,
}

impl AgeValidator {
    /// Create an age validator over `journal` with the given TTL.
    pub fn new(journal: Arc<Journal>, ttl: Duration) -> Self {
        Self { journal, ttl }
    }
}

impl<T> Validator<T> for AgeValidator {
    fn validate(&self, key: &BoxKey, _value: &T) -> bool {
        match self.journal.read(key) {
            Some(timestamp) => {
                let age = unix_millis().saturating_sub(timestamp);
                age <= self.ttl.as_millis() as i64
            }
            None => true,
        }
    }

    fn requires_journal(&self) -> bool {
        true
    }
}
