//! Coordinator wrapper with fault injection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tollgate_core::error::{Error, Result};
use tollgate_external::coordinator::{
    AttributeValue, CoordinatorBackend, CreateTableOutcome, Item, ItemKey, PutCondition,
    PutOutcome, TableSpec, TableStatus,
};
use tollgate_external::entry::ATTR_COMPLETE;

/// Probability of an injected failure per operation kind, in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorRates {
    /// `put_item`.
    pub put: f64,
    /// `get_item`.
    pub get: f64,
    /// `query_latest`.
    pub query: f64,
}

/// Coordinator that fails on demand.
///
/// Most failures happen before the wrapped backend is reached. Lost
/// acknowledgements ([`Self::lose_next_put_acks`]) apply the put and then
/// report a failure, like a remote call timing out after it took effect.
/// Random failures are drawn from a seeded generator so a failing run can be
/// replayed.
pub struct FaultyCoordinator {
    inner: Arc<dyn CoordinatorBackend>,
    rates: ErrorRates,
    rng: Mutex<StdRng>,
    fail_next_puts: AtomicUsize,
    lost_put_acks: AtomicUsize,
    fail_completions: AtomicBool,
    injected: AtomicUsize,
}

impl std::fmt::Debug for FaultyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyCoordinator")
            .field("rates", &self.rates)
            .field("injected", &self.injected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl FaultyCoordinator {
    /// Wraps `inner` without any failures configured.
    pub fn new(inner: Arc<dyn CoordinatorBackend>) -> Self {
        Self {
            inner,
            rates: ErrorRates::default(),
            rng: Mutex::new(StdRng::seed_from_u64(0)),
            fail_next_puts: AtomicUsize::new(0),
            lost_put_acks: AtomicUsize::new(0),
            fail_completions: AtomicBool::new(false),
            injected: AtomicUsize::new(0),
        }
    }

    /// Fails operations at random with the given rates.
    #[must_use]
    pub fn with_error_rates(mut self, rates: ErrorRates, seed: u64) -> Self {
        self.rates = rates;
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Fails the next `count` puts.
    pub fn fail_next_puts(&self, count: usize) {
        self.fail_next_puts.store(count, Ordering::SeqCst);
    }

    /// Applies the next `count` puts but reports each as failed.
    pub fn lose_next_put_acks(&self, count: usize) {
        self.lost_put_acks.store(count, Ordering::SeqCst);
    }

    /// Fails every put that would mark an entry complete.
    pub fn fail_completions(&self, fail: bool) {
        self.fail_completions.store(fail, Ordering::SeqCst);
    }

    /// Number of failures injected so far.
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    fn fail(&self, op: &str) -> Error {
        self.injected.fetch_add(1, Ordering::SeqCst);
        Error::storage(format!("injected coordinator failure: {op}"))
    }

    fn roll(&self, rate: f64) -> bool {
        rate > 0.0 && self.rng.lock().expect("lock").gen_bool(rate.min(1.0))
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl CoordinatorBackend for FaultyCoordinator {
    async fn describe_table(&self, table: &str) -> Result<Option<TableStatus>> {
        self.inner.describe_table(table).await
    }

    async fn create_table(&self, table: &str, spec: &TableSpec) -> Result<CreateTableOutcome> {
        self.inner.create_table(table, spec).await
    }

    async fn put_item(
        &self,
        table: &str,
        item: Item,
        condition: PutCondition,
    ) -> Result<PutOutcome> {
        let completes = item.get(ATTR_COMPLETE) == Some(&AttributeValue::S("true".into()));
        if Self::take(&self.fail_next_puts)
            || (completes && self.fail_completions.load(Ordering::SeqCst))
            || self.roll(self.rates.put)
        {
            return Err(self.fail("put_item"));
        }
        let outcome = self.inner.put_item(table, item, condition).await?;
        if Self::take(&self.lost_put_acks) {
            tracing::debug!(?outcome, "dropping put acknowledgement");
            return Err(self.fail("put_item acknowledgement"));
        }
        Ok(outcome)
    }

    async fn get_item(&self, table: &str, key: &ItemKey) -> Result<Option<Item>> {
        if self.roll(self.rates.get) {
            return Err(self.fail("get_item"));
        }
        self.inner.get_item(table, key).await
    }

    async fn query_latest(&self, table: &str, partition: &str) -> Result<Option<Item>> {
        if self.roll(self.rates.query) {
            return Err(self.fail("query_latest"));
        }
        self.inner.query_latest(table, partition).await
    }
}
