//! Mutable bookkeeping behind a [`super::Store`]: cached values, stale
//! markers, in-flight fetches and temporarily disabled pairs.

use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::warn;

use super::traits::CacheResult;
use crate::error::StoreError;
use crate::resource::ResourceKind;

/// Identity of one cache entry: `(resource name, cache key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheId {
  pub store: String,
  pub key: String,
}

impl CacheId {
  pub fn new(store: impl Into<String>, key: impl Into<String>) -> Self {
    Self {
      store: store.into(),
      key: key.into(),
    }
  }
}

impl fmt::Display for CacheId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.store, self.key)
  }
}

pub(crate) type FetchResult = Result<CacheResult<Value>, StoreError>;
pub(crate) type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct OngoingFetch {
  generation: u64,
  future: SharedFetch,
}

/// Cached values by resource name, then cache key.
pub(crate) type CacheTree = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
pub(crate) struct StoreState {
  cached: CacheTree,
  stale: BTreeSet<CacheId>,
  ongoing: HashMap<CacheId, OngoingFetch>,
  disabled: HashMap<CacheId, Instant>,
  pub cookie: Option<String>,
  generation: u64,
}

impl StoreState {
  pub fn new<'a>(stores: impl IntoIterator<Item = &'a str>, cookie: Option<String>) -> Self {
    let mut state = Self {
      cookie,
      ..Self::default()
    };
    for store in stores {
      state.cached.insert(store.to_string(), BTreeMap::new());
    }
    state
  }

  pub fn tree(&self) -> &CacheTree {
    &self.cached
  }

  pub fn get(&self, id: &CacheId) -> Option<&Value> {
    self.cached.get(&id.store)?.get(&id.key)
  }

  pub fn set(&mut self, id: &CacheId, value: Value) {
    self
      .cached
      .entry(id.store.clone())
      .or_default()
      .insert(id.key.clone(), value);
  }

  pub fn remove(&mut self, id: &CacheId) -> Option<Value> {
    self.cached.get_mut(&id.store)?.remove(&id.key)
  }

  /// Put back a value captured before an optimistic mutation.
  pub fn restore(&mut self, id: &CacheId, previous: Option<Value>) {
    match previous {
      Some(value) => self.set(id, value),
      None => {
        self.remove(id);
      }
    }
  }

  /// Current value, or the empty value of the right shape.
  pub fn current_or_placeholder(&self, id: &CacheId, kind: ResourceKind) -> Value {
    self
      .get(id)
      .cloned()
      .unwrap_or_else(|| kind.placeholder())
  }

  pub fn keys_of(&self, store: &str) -> Vec<String> {
    self
      .cached
      .get(store)
      .map(|entries| entries.keys().cloned().collect())
      .unwrap_or_default()
  }

  /// Swap in a whole new tree, keeping a root for each of `stores`.
  ///
  /// Stale and disabled markers refer to the old values and are dropped.
  pub fn replace_tree<'a>(&mut self, tree: CacheTree, stores: impl IntoIterator<Item = &'a str>) {
    self.cached = tree;
    for store in stores {
      self.cached.entry(store.to_string()).or_default();
    }
    self.stale.clear();
    self.disabled.clear();
  }

  // ==========================================================================
  // Staleness
  // ==========================================================================

  pub fn is_stale(&self, id: &CacheId) -> bool {
    self.stale.contains(id)
  }

  pub fn mark_stale(&mut self, id: CacheId) {
    self.stale.insert(id);
  }

  pub fn mark_fresh(&mut self, id: &CacheId) {
    self.stale.remove(id);
  }

  pub fn stale_ids(&self) -> impl Iterator<Item = &CacheId> {
    self.stale.iter()
  }

  // ==========================================================================
  // In-flight fetches
  // ==========================================================================

  pub fn ongoing(&self, id: &CacheId) -> Option<SharedFetch> {
    self.ongoing.get(id).map(|o| o.future.clone())
  }

  pub fn ongoing_count(&self) -> usize {
    self.ongoing.len()
  }

  /// Reserve a generation number for the next in-flight record.
  pub fn next_generation(&mut self) -> u64 {
    self.generation += 1;
    self.generation
  }

  pub fn register_ongoing(&mut self, id: CacheId, generation: u64, future: SharedFetch) {
    self.ongoing.insert(id, OngoingFetch { generation, future });
  }

  /// Drop the in-flight record for `id` if it still belongs to `generation`.
  pub fn complete_ongoing(&mut self, id: &CacheId, generation: u64) {
    if self
      .ongoing
      .get(id)
      .is_some_and(|o| o.generation == generation)
    {
      self.ongoing.remove(id);
    }
  }

  // ==========================================================================
  // Temporarily disabled pairs
  // ==========================================================================

  /// Whether `id` is blocked at `now`. Expired entries are cleared.
  pub fn is_disabled(&mut self, id: &CacheId, now: Instant) -> bool {
    match self.disabled.get(id) {
      Some(until) if *until > now => true,
      Some(_) => {
        self.disabled.remove(id);
        false
      }
      None => false,
    }
  }

  pub fn disable(&mut self, id: CacheId, until: Instant) {
    self.disabled.insert(id, until);
  }

  /// Drop every cached value and marker, keeping the resource roots.
  pub fn clear(&mut self) {
    for entries in self.cached.values_mut() {
      entries.clear();
    }
    self.stale.clear();
    self.disabled.clear();
  }
}

/// Lock `mutex`, recovering the guard if another thread panicked while holding it.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
  match mutex.lock() {
    Ok(guard) => guard,
    Err(poisoned) => {
      warn!(
        op,
        result = "poisoned_recovered",
        "Recovered from poisoned store lock"
      );
      poisoned.into_inner()
    }
  }
}
