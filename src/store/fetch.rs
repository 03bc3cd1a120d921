//! Cache-first fetching with request de-duplication.

use futures::future::{self, FutureExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::merge;
use super::state::{CacheId, FetchResult, SharedFetch, StoreState};
use super::traits::{CacheResult, CacheSource};
use super::Store;
use crate::error::{RemoteError, StoreError};
use crate::events::{ActionKind, EventPayload};
use crate::resource::{Params, Resource, ResourceKind};

impl Store {
  /// Get the value for `params` from cache, or fetch it from the resource.
  ///
  /// 1. Temporarily disabled pairs return the cached (or empty) value
  /// 2. Fresh, non-empty cache entries are returned as is
  /// 3. Otherwise one network fetch runs per pair; concurrent callers join it
  ///
  /// With `instant_resolve` the best current value is returned right away and
  /// the network result is published as a `fetch` event.
  pub async fn fetch(&self, store: &str, params: &Params) -> Result<Value, StoreError> {
    self
      .fetch_with_source(store, params)
      .await
      .map(|result| result.data)
  }

  /// Like [`Store::fetch`], reporting where the value came from.
  pub async fn fetch_with_source(
    &self,
    store: &str,
    params: &Params,
  ) -> Result<CacheResult<Value>, StoreError> {
    let resource = self.resource(store)?;
    let id = self.cache_id(store, resource.as_ref(), params)?;
    let kind = resource.kind();

    let pending = {
      let mut state = self.state();

      if state.is_disabled(&id, Instant::now()) {
        debug!(store, cache_key = %id.key, "fetch disabled, serving cache");
        return Ok(CacheResult::new(
          state.current_or_placeholder(&id, kind),
          CacheSource::Disabled,
        ));
      }

      let stale = state.is_stale(&id);
      if !stale {
        if let Some(value) = state.get(&id).filter(|v| has_content(v)) {
          debug!(store, cache_key = %id.key, "cache hit");
          return Ok(CacheResult::from_cache(value.clone(), false));
        }
      }

      let pending = match state.ongoing(&id) {
        Some(ongoing) => {
          debug!(store, cache_key = %id.key, "joining ongoing fetch");
          ongoing
        }
        None => self.start_fetch(&mut state, &id, resource, params.clone()),
      };

      if self.inner.options.instant_resolve {
        let current = match state.get(&id) {
          Some(value) => CacheResult::from_cache(value.clone(), true),
          None => CacheResult::new(kind.placeholder(), CacheSource::Placeholder),
        };
        self.publish_when_settled(id, params.clone(), pending);
        return Ok(current);
      }

      pending
    };

    pending.await
  }

  /// Fetch several resources concurrently.
  ///
  /// Fails with the first error; no partial result is returned.
  pub async fn fetch_all<I, S>(&self, requests: I) -> Result<BTreeMap<String, Value>, StoreError>
  where
    I: IntoIterator<Item = (S, Params)>,
    S: Into<String>,
  {
    let requests: Vec<(String, Params)> = requests
      .into_iter()
      .map(|(store, params)| (store.into(), params))
      .collect();

    let values = future::try_join_all(
      requests
        .iter()
        .map(|(store, params)| self.fetch(store, params)),
    )
    .await?;

    Ok(
      requests
        .into_iter()
        .map(|(store, _)| store)
        .zip(values)
        .collect(),
    )
  }

  /// Spawn the network fetch for `id` and register it as in flight.
  ///
  /// The spawned task updates the cache even if every caller stops waiting.
  fn start_fetch(
    &self,
    state: &mut StoreState,
    id: &CacheId,
    resource: Arc<dyn Resource>,
    params: Params,
  ) -> SharedFetch {
    let generation = state.next_generation();
    let options = crate::resource::RequestOptions::with_cookie(state.cookie.as_deref());
    let kind = resource.kind();

    info!(store = %id.store, cache_key = %id.key, "fetching from network");

    let task_store = self.clone();
    let task_id = id.clone();
    let handle = tokio::spawn(async move {
      let result = resource.fetch(&params, &options).await;
      task_store.settle_fetch(&task_id, kind, generation, result)
    });

    let store_name = id.store.clone();
    let shared = async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => Err(StoreError::TaskFailed {
          store: store_name,
          message: e.to_string(),
        }),
      }
    }
    .boxed()
    .shared();

    state.register_ongoing(id.clone(), generation, shared.clone());
    shared
  }

  /// Fold a network outcome into the cache and decide what callers get.
  fn settle_fetch(
    &self,
    id: &CacheId,
    kind: ResourceKind,
    generation: u64,
    result: Result<Value, RemoteError>,
  ) -> FetchResult {
    let options = &self.inner.options;
    let result = result.and_then(|value| conform(kind, value));
    let mut state = self.state();

    match result {
      Ok(fresh) => {
        let value = match state.get(id) {
          Some(previous) => merge::reconcile(kind, previous, fresh, &options.identifier),
          None => fresh,
        };
        state.set(id, value.clone());
        state.mark_fresh(id);
        drop(state);

        info!(store = %id.store, cache_key = %id.key, "fetch completed");
        self.release_after_grace(id.clone(), generation);
        Ok(CacheResult::from_network(value))
      }
      Err(err) if options.is_allowed_status(err.status) => {
        state.complete_ongoing(id, generation);
        warn!(
          store = %id.store,
          cache_key = %id.key,
          status = ?err.status,
          "fetch failed with allowed status, serving cached data"
        );
        Ok(CacheResult::new(
          state.current_or_placeholder(id, kind),
          CacheSource::Placeholder,
        ))
      }
      Err(err) => {
        state.complete_ongoing(id, generation);
        state.disable(id.clone(), Instant::now() + options.disable_window);
        warn!(
          store = %id.store,
          cache_key = %id.key,
          status = ?err.status,
          disabled_for = ?options.disable_window,
          "fetch failed, disabling further fetches"
        );
        Err(StoreError::remote_fetch(&id.store, err))
      }
    }
  }

  /// Keep the finished fetch joinable for the grace period, then forget it.
  fn release_after_grace(&self, id: CacheId, generation: u64) {
    let store = self.clone();
    let grace = self.inner.options.fetch_grace_period;
    tokio::spawn(async move {
      tokio::time::sleep(grace).await;
      store.state().complete_ongoing(&id, generation);
    });
  }

  fn publish_when_settled(&self, id: CacheId, params: Params, pending: SharedFetch) {
    let store = self.clone();
    tokio::spawn(async move {
      let outcome = pending.await.map(|result| EventPayload {
        store: id.store.clone(),
        cache_key: Some(id.key.clone()),
        params,
        result: Some(result.data),
      });
      store.events().publish(ActionKind::Fetch, &id.store, outcome);
    });
  }
}

/// Non-empty objects/arrays and any scalar count as content.
fn has_content(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Array(items) => !items.is_empty(),
    Value::Object(fields) => !fields.is_empty(),
    _ => true,
  }
}

/// Check a fetched value has the shape `kind` caches. `null` means empty.
fn conform(kind: ResourceKind, value: Value) -> Result<Value, RemoteError> {
  if value.is_null() {
    return Ok(kind.placeholder());
  }
  if kind.accepts(&value) {
    Ok(value)
  } else {
    Err(RemoteError::transport(format!(
      "unexpected response shape for a {:?}",
      kind
    )))
  }
}
