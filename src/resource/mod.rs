//! Resource descriptors: what the store knows about each remote resource type.
//!
//! A resource is either a collection (an ordered list of records) or a model
//! (a single record). Descriptors are pure: they derive cache keys and related
//! caches from request params and perform remote calls, but hold no cached
//! state themselves.

pub mod http;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::RemoteError;

pub use http::HttpResource;

/// Request parameters for a resource, e.g. `{"id": "Ferrari"}`.
pub type Params = serde_json::Map<String, Value>;

/// Cache key used by collections that have no `id` param.
pub const ROOT_KEY: &str = "/";

/// Convert a JSON value into params. Non-object values yield empty params.
pub fn to_params(value: Value) -> Params {
  match value {
    Value::Object(map) => map,
    _ => Params::new(),
  }
}

/// Render a param as a key segment.
///
/// Strings are used verbatim, numbers and booleans are stringified. Missing,
/// null and empty-string params yield `None`.
pub fn param_str(params: &Params, name: &str) -> Option<String> {
  match params.get(name)? {
    Value::String(s) if s.is_empty() => None,
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

/// Whether a resource holds a list of records or a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
  Collection,
  Model,
}

impl ResourceKind {
  /// Value handed out when nothing is cached yet.
  pub fn placeholder(self) -> Value {
    match self {
      Self::Collection => Value::Array(Vec::new()),
      Self::Model => Value::Object(serde_json::Map::new()),
    }
  }

  /// Whether `value` has the JSON shape this kind caches.
  pub fn accepts(self, value: &Value) -> bool {
    match self {
      Self::Collection => value.is_array(),
      Self::Model => value.is_object(),
    }
  }

  /// Default cache key derivation.
  ///
  /// Collections fall back to [`ROOT_KEY`] so a single collection always has
  /// a key; models only have one when an `id` param is present.
  pub fn default_cache_key(self, params: &Params) -> Option<String> {
    match self {
      Self::Collection => Some(param_str(params, "id").unwrap_or_else(|| ROOT_KEY.to_string())),
      Self::Model => param_str(params, "id"),
    }
  }
}

/// A cached entry of another resource invalidated together with this one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelatedCache {
  pub store: String,
  pub cache_key: String,
}

impl RelatedCache {
  pub fn new(store: impl Into<String>, cache_key: impl Into<String>) -> Self {
    Self {
      store: store.into(),
      cache_key: cache_key.into(),
    }
  }
}

/// Per-request transport options handed to every remote call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
  pub headers: Vec<(String, String)>,
}

impl RequestOptions {
  /// Options forwarding `cookie` as a `Cookie` header.
  pub fn with_cookie(cookie: Option<&str>) -> Self {
    let headers = cookie
      .map(|c| vec![("Cookie".to_string(), c.to_string())])
      .unwrap_or_default();
    Self { headers }
  }

  /// Case-insensitive header lookup.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// Descriptor for one named resource type.
///
/// Only `kind` and `fetch` are required. Mutating capabilities default to
/// failing with [`RemoteError::unsupported`].
#[async_trait]
pub trait Resource: Send + Sync {
  fn kind(&self) -> ResourceKind;

  /// Cache key for `params`. `None` means the params do not identify an entry.
  fn cache_key(&self, params: &Params) -> Option<String> {
    self.kind().default_cache_key(params)
  }

  /// Entries of other resources that go stale when this one mutates.
  fn related_caches(&self, _params: &Params) -> Vec<RelatedCache> {
    Vec::new()
  }

  /// Load the current remote value.
  async fn fetch(&self, params: &Params, options: &RequestOptions) -> Result<Value, RemoteError>;

  /// Add a record to a collection, returning the created record.
  async fn create(
    &self,
    _params: &Params,
    _attrs: &Value,
    _options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    Err(RemoteError::unsupported("create"))
  }

  /// Save changed attributes of a model, returning the saved record.
  async fn update(
    &self,
    _params: &Params,
    _attrs: &Value,
    _options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    Err(RemoteError::unsupported("update"))
  }

  /// Delete a model. `record` always carries the identifier field.
  async fn delete(
    &self,
    _params: &Params,
    _record: &Value,
    _options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    Err(RemoteError::unsupported("delete"))
  }
}

/// Named set of resource descriptors a store is built from.
#[derive(Clone, Default)]
pub struct Registry {
  resources: BTreeMap<String, Arc<dyn Resource>>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `resource` under `name`, replacing any previous registration.
  pub fn register(mut self, name: impl Into<String>, resource: impl Resource + 'static) -> Self {
    self.resources.insert(name.into(), Arc::new(resource));
    self
  }

  pub fn insert(&mut self, name: impl Into<String>, resource: Arc<dyn Resource>) {
    self.resources.insert(name.into(), resource);
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Resource>> {
    self.resources.get(name).cloned()
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.resources.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Resource>)> {
    self.resources.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }
}

impl std::fmt::Debug for Registry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Registry")
      .field("resources", &self.resources.keys().collect::<Vec<_>>())
      .finish()
  }
}
