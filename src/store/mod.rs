//! In-memory cache of remote collections and models.
//!
//! The store:
//! - returns cached values while they are fresh and fetches otherwise,
//!   with at most one network request in flight per `(resource, cache key)`
//! - applies create/update/delete optimistically and rolls back on failure
//! - marks entries (and their related caches) stale instead of dropping them
//! - degrades to empty data for allowed error statuses and blocks repeated
//!   failing fetches for a while
//! - serializes its whole cache to JSON and back (`snapshot` / `bootstrap`)

mod actions;
mod fetch;
pub mod merge;
mod options;
mod snapshot;
mod state;
mod traits;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::StoreError;
use crate::events::{EventBus, EventOutcome, HandlerId};
use crate::resource::{Params, Registry, RequestOptions, Resource};

pub use actions::Action;
pub use options::{
  StoreOptions, DEFAULT_ALLOWED_STATUS_CODES, DEFAULT_DISABLE_WINDOW, DEFAULT_FETCH_GRACE_PERIOD,
};
pub use state::CacheId;
pub use traits::{CacheResult, CacheSource};

pub(crate) use state::lock;
use state::StoreState;

/// Shared handle to one cache. Clones refer to the same state.
#[derive(Clone)]
pub struct Store {
  inner: Arc<Inner>,
}

struct Inner {
  resources: Registry,
  options: StoreOptions,
  state: Mutex<StoreState>,
  events: EventBus,
}

impl Store {
  /// Create a store with an empty root for every registered resource.
  pub fn new(resources: Registry, options: StoreOptions) -> Self {
    let state = StoreState::new(resources.names(), options.cookie.clone());
    debug!(resources = resources.len(), "store created");
    Self {
      inner: Arc::new(Inner {
        resources,
        options,
        state: Mutex::new(state),
        events: EventBus::new(),
      }),
    }
  }

  pub fn options(&self) -> &StoreOptions {
    &self.inner.options
  }

  pub fn resources(&self) -> &Registry {
    &self.inner.resources
  }

  pub fn events(&self) -> &EventBus {
    &self.inner.events
  }

  /// Register an observer, see [`EventBus::on`].
  pub fn on<F>(&self, name: impl Into<String>, handler: F) -> HandlerId
  where
    F: Fn(&EventOutcome) + Send + Sync + 'static,
  {
    self.inner.events.on(name, handler)
  }

  pub fn off(&self, id: HandlerId) -> bool {
    self.inner.events.off(id)
  }

  pub fn cookie(&self) -> Option<String> {
    self.state().cookie.clone()
  }

  /// Stop forwarding the cookie on subsequent remote calls.
  pub fn clear_cookie(&self) {
    self.state().cookie = None;
  }

  /// Cached value for `(store, key)`, stale or not.
  pub fn cached(&self, store: &str, key: &str) -> Option<serde_json::Value> {
    self.state().get(&CacheId::new(store, key)).cloned()
  }

  /// Cache keys currently held for `store`.
  pub fn cache_keys(&self, store: &str) -> Vec<String> {
    self.state().keys_of(store)
  }

  pub fn is_cache_stale(&self, store: &str, key: &str) -> bool {
    self.state().is_stale(&CacheId::new(store, key))
  }

  /// Every pair currently marked stale, sorted.
  pub fn stale_caches(&self) -> Vec<CacheId> {
    self.state().stale_ids().cloned().collect()
  }

  pub fn is_fetch_ongoing(&self, store: &str, key: &str) -> bool {
    self.state().ongoing(&CacheId::new(store, key)).is_some()
  }

  pub fn ongoing_fetch_count(&self) -> usize {
    self.state().ongoing_count()
  }

  pub fn is_disabled(&self, store: &str, key: &str) -> bool {
    self
      .state()
      .is_disabled(&CacheId::new(store, key), tokio::time::Instant::now())
  }

  /// Mark the entry for `params` stale, together with its related caches.
  ///
  /// When `params` yield no cache key every entry of `store` is marked.
  /// Cached values stay readable until a fetch replaces them.
  pub fn clear_cache(&self, store: &str, params: &Params) -> Result<(), StoreError> {
    let resource = self.resource(store)?;
    self.invalidate(store, resource.as_ref(), params);
    Ok(())
  }

  /// Drop every cached value and marker. In-flight fetches still land.
  pub fn reset(&self) {
    self.state().clear();
  }

  // ==========================================================================
  // Internal helpers
  // ==========================================================================

  fn state(&self) -> MutexGuard<'_, StoreState> {
    lock(&self.inner.state, "store.state")
  }

  fn resource(&self, store: &str) -> Result<Arc<dyn Resource>, StoreError> {
    self
      .inner
      .resources
      .get(store)
      .ok_or_else(|| StoreError::UnregisteredStore(store.to_string()))
  }

  fn cache_id(
    &self,
    store: &str,
    resource: &dyn Resource,
    params: &Params,
  ) -> Result<CacheId, StoreError> {
    resource
      .cache_key(params)
      .map(|key| CacheId::new(store, key))
      .ok_or_else(|| StoreError::NoCacheKey(store.to_string()))
  }

  fn request_options(&self) -> RequestOptions {
    RequestOptions::with_cookie(self.state().cookie.as_deref())
  }

  fn invalidate(&self, store: &str, resource: &dyn Resource, params: &Params) {
    let mut state = self.state();
    match resource.cache_key(params) {
      Some(key) => state.mark_stale(CacheId::new(store, key)),
      None => {
        for key in state.keys_of(store) {
          state.mark_stale(CacheId::new(store, key));
        }
      }
    }
    for related in resource.related_caches(params) {
      debug!(
        store,
        related = %related.store,
        key = %related.cache_key,
        "related cache marked stale"
      );
      state.mark_stale(CacheId::new(related.store, related.cache_key));
    }
  }
}

impl std::fmt::Debug for Store {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Store")
      .field("resources", &self.inner.resources)
      .field("options", &self.inner.options)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::testing::MockResource;
  use super::*;
  use crate::resource::to_params;
  use serde_json::json;

  fn store() -> Store {
    let registry = Registry::new()
      .register("cars", MockResource::collection(json!([{"id": "Ferrari"}])))
      .register(
        "car",
        MockResource::model(json!({"id": "Ferrari"})).with_related("cars", "/"),
      );
    Store::new(registry, StoreOptions::default().with_cookie("session=abc"))
  }

  #[test]
  fn test_roots_created_for_registered_resources() {
    let store = store();
    assert!(store.cache_keys("cars").is_empty());
    assert!(store.cache_keys("car").is_empty());
    assert_eq!(store.snapshot(), r#"{"car":{},"cars":{}}"#);
  }

  #[test]
  fn test_clear_cache_marks_related() {
    let store = store();
    store
      .clear_cache("car", &to_params(json!({"id": "Ferrari"})))
      .expect("registered");

    assert!(store.is_cache_stale("car", "Ferrari"));
    assert!(store.is_cache_stale("cars", "/"));
    assert_eq!(
      store.stale_caches(),
      vec![CacheId::new("car", "Ferrari"), CacheId::new("cars", "/")]
    );
  }

  #[tokio::test]
  async fn test_clear_cache_without_key_marks_every_entry() {
    let store = store();
    store
      .fetch("car", &to_params(json!({"id": "Ferrari"})))
      .await
      .expect("fetch");
    store
      .fetch("car", &to_params(json!({"id": "Lada"})))
      .await
      .expect("fetch");

    store.clear_cache("car", &Params::new()).expect("registered");
    assert!(store.is_cache_stale("car", "Ferrari"));
    assert!(store.is_cache_stale("car", "Lada"));
  }

  #[test]
  fn test_clear_cache_unregistered() {
    let err = store()
      .clear_cache("boats", &Params::new())
      .expect_err("unregistered");
    assert!(matches!(err, StoreError::UnregisteredStore(name) if name == "boats"));
  }

  #[test]
  fn test_clear_cookie() {
    let store = store();
    assert_eq!(store.cookie().as_deref(), Some("session=abc"));
    assert_eq!(
      store.request_options().header("Cookie"),
      Some("session=abc")
    );
    store.clear_cookie();
    assert!(store.request_options().headers.is_empty());
  }

  #[tokio::test]
  async fn test_reset_drops_values() {
    let store = store();
    store.fetch("cars", &Params::new()).await.expect("fetch");
    assert!(store.cached("cars", "/").is_some());

    store.reset();
    assert!(store.cached("cars", "/").is_none());
    assert_eq!(store.snapshot(), r#"{"car":{},"cars":{}}"#);
  }
}
