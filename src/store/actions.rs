//! Optimistic create/update/delete and explicit expiry.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::merge::deep_merge;
use super::state::CacheId;
use super::Store;
use crate::error::{RemoteError, StoreError};
use crate::events::{ActionKind, EventPayload};
use crate::resource::{Params, Resource, ResourceKind};

/// A mutation request, as accepted by [`Store::dispatch`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Action {
  Create {
    store: String,
    #[serde(default)]
    params: Params,
    attrs: Value,
  },
  Update {
    store: String,
    #[serde(default)]
    params: Params,
    attrs: Value,
  },
  Delete {
    store: String,
    #[serde(default)]
    params: Params,
  },
  Expire {
    store: String,
    #[serde(default)]
    params: Params,
  },
}

impl Action {
  pub fn kind(&self) -> ActionKind {
    match self {
      Self::Create { .. } => ActionKind::Create,
      Self::Update { .. } => ActionKind::Update,
      Self::Delete { .. } => ActionKind::Delete,
      Self::Expire { .. } => ActionKind::Expire,
    }
  }

  pub fn store(&self) -> &str {
    match self {
      Self::Create { store, .. }
      | Self::Update { store, .. }
      | Self::Delete { store, .. }
      | Self::Expire { store, .. } => store,
    }
  }
}

impl Store {
  /// Run `action`. Returns the remote result for create/update/delete.
  pub async fn dispatch(&self, action: Action) -> Result<Option<Value>, StoreError> {
    debug!(action = action.kind().as_str(), store = action.store(), "dispatch");
    match action {
      Action::Create {
        store,
        params,
        attrs,
      } => self.create(&store, &params, &attrs).await.map(Some),
      Action::Update {
        store,
        params,
        attrs,
      } => self.update(&store, &params, &attrs).await.map(Some),
      Action::Delete { store, params } => self.delete(&store, &params).await.map(Some),
      Action::Expire { store, params } => self.expire(&store, &params).await.map(|_| None),
    }
  }

  /// Append `attrs` to the collection right away, then create it remotely.
  ///
  /// On failure the collection goes back to what it was before the call.
  pub async fn create(
    &self,
    store: &str,
    params: &Params,
    attrs: &Value,
  ) -> Result<Value, StoreError> {
    let resource = self.resource(store)?;
    if resource.kind() != ResourceKind::Collection {
      return Err(self.reject(
        ActionKind::Create,
        StoreError::NotACollection(store.to_string()),
      ));
    }
    let id = self.cache_id(store, resource.as_ref(), params)?;

    let previous = {
      let mut state = self.state();
      let previous = state.get(&id).cloned();
      let mut items = match &previous {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
      };
      items.push(attrs.clone());
      state.set(&id, Value::Array(items));
      previous
    };

    match resource.create(params, attrs, &self.request_options()).await {
      Ok(result) => Ok(self.mutation_succeeded(
        ActionKind::Create,
        resource.as_ref(),
        &id,
        params,
        result,
      )),
      Err(source) => {
        self.state().restore(&id, previous);
        Err(self.mutation_failed(ActionKind::Create, &id, params, source))
      }
    }
  }

  /// Merge `attrs` into the cached model right away, then update it remotely.
  pub async fn update(
    &self,
    store: &str,
    params: &Params,
    attrs: &Value,
  ) -> Result<Value, StoreError> {
    let resource = self.resource(store)?;
    if resource.kind() != ResourceKind::Model {
      return Err(self.reject(
        ActionKind::Update,
        StoreError::NotAModel {
          store: store.to_string(),
          action: "update",
        },
      ));
    }
    let id = self.cache_id(store, resource.as_ref(), params)?;

    let previous = {
      let mut state = self.state();
      let previous = state.get(&id).cloned();
      if let Some(existing) = &previous {
        state.set(&id, deep_merge(existing, attrs));
      }
      previous
    };

    match resource.update(params, attrs, &self.request_options()).await {
      Ok(result) => Ok(self.mutation_succeeded(
        ActionKind::Update,
        resource.as_ref(),
        &id,
        params,
        result,
      )),
      Err(source) => {
        if let Some(previous) = previous {
          self.state().set(&id, previous);
        }
        Err(self.mutation_failed(ActionKind::Update, &id, params, source))
      }
    }
  }

  /// Drop the cached model right away, then delete it remotely.
  ///
  /// The record sent upstream always carries the identifier field.
  pub async fn delete(&self, store: &str, params: &Params) -> Result<Value, StoreError> {
    let resource = self.resource(store)?;
    if resource.kind() != ResourceKind::Model {
      return Err(self.reject(
        ActionKind::Delete,
        StoreError::NotAModel {
          store: store.to_string(),
          action: "delete",
        },
      ));
    }
    let id = self.cache_id(store, resource.as_ref(), params)?;

    let previous = self.state().remove(&id);
    let record = self.delete_record(&id, params, previous.as_ref());

    match resource.delete(params, &record, &self.request_options()).await {
      Ok(result) => Ok(self.mutation_succeeded(
        ActionKind::Delete,
        resource.as_ref(),
        &id,
        params,
        result,
      )),
      Err(source) => {
        if let Some(previous) = previous {
          self.state().set(&id, previous);
        }
        Err(self.mutation_failed(ActionKind::Delete, &id, params, source))
      }
    }
  }

  /// Mark the entry and its related caches stale without any remote call.
  pub async fn expire(&self, store: &str, params: &Params) -> Result<(), StoreError> {
    let resource = self.resource(store)?;
    self.invalidate(store, resource.as_ref(), params);

    let payload = EventPayload {
      store: store.to_string(),
      cache_key: resource.cache_key(params),
      params: params.clone(),
      result: None,
    };
    self.events().publish(ActionKind::Expire, store, Ok(payload));
    Ok(())
  }

  // ==========================================================================
  // Outcome handling
  // ==========================================================================

  fn delete_record(&self, id: &CacheId, params: &Params, previous: Option<&Value>) -> Value {
    let identifier = &self.inner.options.identifier;
    let mut record = match previous {
      Some(Value::Object(fields)) => fields.clone(),
      _ => Map::new(),
    };
    let id_value = params
      .get(identifier)
      .or_else(|| params.get("id"))
      .cloned()
      .unwrap_or_else(|| Value::String(id.key.clone()));
    record.insert(identifier.clone(), id_value);
    Value::Object(record)
  }

  fn mutation_succeeded(
    &self,
    action: ActionKind,
    resource: &dyn Resource,
    id: &CacheId,
    params: &Params,
    result: Value,
  ) -> Value {
    if self.inner.options.auto_clear_caches {
      self.invalidate(&id.store, resource, params);
    }
    debug!(action = action.as_str(), cache = %id, "mutation succeeded");

    let payload = EventPayload {
      store: id.store.clone(),
      cache_key: Some(id.key.clone()),
      params: params.clone(),
      result: Some(result.clone()),
    };
    self.events().publish(action, &id.store, Ok(payload));
    result
  }

  fn mutation_failed(
    &self,
    action: ActionKind,
    id: &CacheId,
    params: &Params,
    source: RemoteError,
  ) -> StoreError {
    warn!(
      action = action.as_str(),
      cache = %id,
      status = ?source.status,
      "mutation failed, optimistic change rolled back"
    );
    let err = StoreError::RemoteMutation {
      action: action.as_str(),
      store: id.store.clone(),
      params: params.clone(),
      source,
    };
    self.reject(action, err)
  }

  /// Publish `err` on the failure path of `action` and hand it back.
  fn reject(&self, action: ActionKind, err: StoreError) -> StoreError {
    self.events().publish(action, err.store(), Err(err.clone()));
    err
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::MockResource;
  use super::*;
  use crate::events::EventOutcome;
  use crate::resource::{to_params, Registry};
  use crate::store::StoreOptions;
  use serde_json::json;
  use std::sync::atomic::Ordering;
  use std::sync::{Arc, Mutex};

  fn ferrari() -> Params {
    to_params(json!({"id": "Ferrari"}))
  }

  fn record(store: &Store, name: &str) -> Arc<Mutex<Vec<EventOutcome>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    store.on(name, move |outcome| s.lock().expect("lock").push(outcome.clone()));
    seen
  }

  fn garage(car: MockResource, options: StoreOptions) -> Store {
    let registry = Registry::new()
      .register("cars", MockResource::collection(json!([{"id": "Ferrari"}])))
      .register("car", car.with_related("cars", "/"));
    Store::new(registry, options)
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_applies_optimistically() {
    let cars = MockResource::collection(json!([{"id": 1}]));
    let calls = cars.calls();
    let store = Store::new(Registry::new().register("cars", cars), StoreOptions::default());
    let events = record(&store, "create:cars");

    store.fetch("cars", &Params::new()).await.expect("fetch");
    let attrs = json!({"name": "Tesla"});
    let params = Params::new();
    let mut pending = Box::pin(store.create("cars", &params, &attrs));
    assert!(futures::poll!(&mut pending).is_pending());
    assert_eq!(
      store.cached("cars", "/"),
      Some(json!([{"id": 1}, {"name": "Tesla"}]))
    );

    let created = pending.await.expect("created");
    assert_eq!(created, json!({"name": "Tesla"}));
    assert!(store.is_cache_stale("cars", "/"));
    assert_eq!(calls.create.load(Ordering::SeqCst), 1);

    let events = events.lock().expect("lock");
    let payload = events[0].as_ref().expect("success");
    assert_eq!(payload.cache_key.as_deref(), Some("/"));
    assert_eq!(payload.result, Some(json!({"name": "Tesla"})));
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_rolls_back_on_failure() {
    let cars = MockResource::collection(json!([])).mutations(Err(RemoteError::new(500, "boom")));
    let store = Store::new(Registry::new().register("cars", cars), StoreOptions::default());
    let events = record(&store, "create");

    let attrs = json!({"name": "Tesla"});
    let params = Params::new();
    let mut pending = Box::pin(store.create("cars", &params, &attrs));
    assert!(futures::poll!(&mut pending).is_pending());
    assert_eq!(store.cached("cars", "/"), Some(json!([{"name": "Tesla"}])));

    let err = pending.await.expect_err("failed");
    assert_eq!(err.to_string(), "Creating new item to store 'cars' failed");
    assert_eq!(err.status(), Some(500));
    assert!(store.cached("cars", "/").is_none());
    assert!(!store.is_cache_stale("cars", "/"));
    assert!(events.lock().expect("lock")[0].is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_marks_model_and_related_stale() {
    let car = MockResource::model(json!({"id": "Ferrari", "color": "red"}));
    let calls = car.calls();
    let store = garage(car, StoreOptions::default());
    let events = record(&store, "update:car");

    store.fetch("cars", &Params::new()).await.expect("fetch");
    store.fetch("car", &ferrari()).await.expect("fetch");

    let mut pending = Box::pin(store.dispatch(Action::Update {
      store: "car".to_string(),
      params: ferrari(),
      attrs: json!({"color": "yellow"}),
    }));
    assert!(futures::poll!(&mut pending).is_pending());
    assert_eq!(
      store.cached("car", "Ferrari"),
      Some(json!({"id": "Ferrari", "color": "yellow"}))
    );

    let result = pending.await.expect("updated");
    assert_eq!(result, Some(json!({"color": "yellow"})));
    assert_eq!(calls.update.load(Ordering::SeqCst), 1);
    assert!(store.is_cache_stale("car", "Ferrari"));
    assert!(store.is_cache_stale("cars", "/"));

    let events = events.lock().expect("lock");
    let payload = events[0].as_ref().expect("success");
    assert_eq!(payload.store, "car");
    assert_eq!(payload.cache_key.as_deref(), Some("Ferrari"));
    assert_eq!(payload.params, ferrari());
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_rolls_back_verbatim() {
    let car = MockResource::model(json!({"id": "Ferrari", "engine": {"hp": 600}}))
      .mutations(Err(RemoteError::new(422, "invalid")));
    let store = garage(car, StoreOptions::default());

    store.fetch("car", &ferrari()).await.expect("fetch");
    let err = store
      .update("car", &ferrari(), &json!({"engine": {"hp": 9000}}))
      .await
      .expect_err("rejected");

    assert!(matches!(
      err,
      StoreError::RemoteMutation { action: "update", store: ref name, .. } if name == "car"
    ));
    assert_eq!(
      store.cached("car", "Ferrari"),
      Some(json!({"id": "Ferrari", "engine": {"hp": 600}}))
    );
    assert!(!store.is_cache_stale("cars", "/"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_without_cached_entry() {
    let store = garage(MockResource::model(json!({})), StoreOptions::default());
    let result = store
      .update("car", &ferrari(), &json!({"color": "blue"}))
      .await
      .expect("updated");
    assert_eq!(result, json!({"color": "blue"}));
    assert!(store.cached("car", "Ferrari").is_none());
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_restores_on_failure() {
    let car = MockResource::model(json!({"id": "Ferrari", "color": "red"}))
      .mutations(Err(RemoteError::new(500, "boom")));
    let calls = car.calls();
    let store = garage(car, StoreOptions::default());

    store.fetch("car", &ferrari()).await.expect("fetch");
    let params = ferrari();
    let mut pending = Box::pin(store.delete("car", &params));
    assert!(futures::poll!(&mut pending).is_pending());
    assert!(store.cached("car", "Ferrari").is_none());

    let err = pending.await.expect_err("failed");
    assert_eq!(err.to_string(), "Deleting 'car' failed");
    assert_eq!(calls.delete.load(Ordering::SeqCst), 1);
    assert_eq!(
      store.cached("car", "Ferrari"),
      Some(json!({"id": "Ferrari", "color": "red"}))
    );
    assert_eq!(
      *calls.last_record.lock().expect("lock"),
      Some(json!({"id": "Ferrari", "color": "red"}))
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_delete_record_uses_configured_identifier() {
    let car = MockResource::model(json!({}));
    let calls = car.calls();
    let store = garage(car, StoreOptions::default().with_identifier("slug"));

    store.delete("car", &ferrari()).await.expect("deleted");
    assert_eq!(
      *calls.last_record.lock().expect("lock"),
      Some(json!({"slug": "Ferrari"}))
    );
    assert!(store.is_cache_stale("car", "Ferrari"));
  }

  #[tokio::test]
  async fn test_kind_mismatch_published_and_returned() {
    let store = garage(MockResource::model(json!({})), StoreOptions::default());
    let creates = record(&store, "create");
    let updates = record(&store, "update:cars");
    let deletes = record(&store, "delete");

    let err = store
      .create("car", &ferrari(), &json!({}))
      .await
      .expect_err("model");
    assert!(matches!(err, StoreError::NotACollection(ref s) if s == "car"));

    let err = store
      .update("cars", &Params::new(), &json!({}))
      .await
      .expect_err("collection");
    assert_eq!(err.to_string(), "You can call update only for models! (store 'cars')");

    let err = store.delete("cars", &Params::new()).await.expect_err("collection");
    assert!(matches!(err, StoreError::NotAModel { action: "delete", .. }));

    assert!(creates.lock().expect("lock")[0].is_err());
    assert!(updates.lock().expect("lock")[0].is_err());
    assert!(deletes.lock().expect("lock")[0].is_err());
  }

  #[tokio::test]
  async fn test_unregistered_store_publishes_nothing() {
    let store = garage(MockResource::model(json!({})), StoreOptions::default());
    let events = record(&store, "create");
    let err = store
      .create("boats", &Params::new(), &json!({}))
      .await
      .expect_err("unregistered");
    assert!(matches!(err, StoreError::UnregisteredStore(_)));
    assert!(events.lock().expect("lock").is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_auto_clear_disabled() {
    let store = garage(
      MockResource::model(json!({"id": "Ferrari"})),
      StoreOptions::default().with_auto_clear_caches(false),
    );
    store
      .update("car", &ferrari(), &json!({"color": "red"}))
      .await
      .expect("updated");
    assert!(store.stale_caches().is_empty());
  }

  #[tokio::test]
  async fn test_expire_marks_stale_and_publishes() {
    let store = garage(MockResource::model(json!({})), StoreOptions::default());
    let events = record(&store, "expire:car");

    store.expire("car", &ferrari()).await.expect("expired");
    assert!(store.is_cache_stale("car", "Ferrari"));
    assert!(store.is_cache_stale("cars", "/"));

    let events = events.lock().expect("lock");
    let payload = events[0].as_ref().expect("success");
    assert_eq!(payload.cache_key.as_deref(), Some("Ferrari"));
    assert_eq!(payload.result, None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dispatch_routes_actions() {
    let store = garage(MockResource::model(json!({})), StoreOptions::default());

    let action: Action = serde_json::from_value(json!({
      "action": "update",
      "store": "car",
      "params": {"id": "Ferrari"},
      "attrs": {"color": "red"}
    }))
    .expect("valid action");
    assert_eq!(action.kind(), ActionKind::Update);
    assert_eq!(action.store(), "car");
    assert_eq!(
      store.dispatch(action).await.expect("updated"),
      Some(json!({"color": "red"}))
    );

    let expire = Action::Expire {
      store: "cars".to_string(),
      params: Params::new(),
    };
    assert_eq!(store.dispatch(expire).await.expect("expired"), None);
    assert!(store.is_cache_stale("cars", "/"));
  }
}
