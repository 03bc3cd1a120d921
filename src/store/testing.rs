//! In-process resource double for store tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::RemoteError;
use crate::resource::{Params, RelatedCache, RequestOptions, Resource, ResourceKind};

/// Call counters and captured arguments, shared with the test body.
#[derive(Debug, Default)]
pub struct Calls {
  pub fetch: AtomicUsize,
  pub create: AtomicUsize,
  pub update: AtomicUsize,
  pub delete: AtomicUsize,
  pub last_headers: Mutex<Vec<(String, String)>>,
  pub last_record: Mutex<Option<Value>>,
}

impl Calls {
  pub fn fetches(&self) -> usize {
    self.fetch.load(Ordering::SeqCst)
  }
}

pub struct MockResource {
  kind: ResourceKind,
  responses: Mutex<VecDeque<Result<Value, RemoteError>>>,
  fallback: Result<Value, RemoteError>,
  mutation: Option<Result<Value, RemoteError>>,
  delay: Duration,
  related: Vec<RelatedCache>,
  calls: Arc<Calls>,
}

impl MockResource {
  fn new(kind: ResourceKind, value: Value) -> Self {
    Self {
      kind,
      responses: Mutex::new(VecDeque::new()),
      fallback: Ok(value),
      mutation: None,
      delay: Duration::from_millis(10),
      related: Vec::new(),
      calls: Arc::new(Calls::default()),
    }
  }

  pub fn collection(value: Value) -> Self {
    Self::new(ResourceKind::Collection, value)
  }

  pub fn model(value: Value) -> Self {
    Self::new(ResourceKind::Model, value)
  }

  /// Responses returned by successive fetches before falling back.
  pub fn responding(self, responses: impl IntoIterator<Item = Result<Value, RemoteError>>) -> Self {
    self
      .responses
      .lock()
      .expect("mock lock")
      .extend(responses);
    self
  }

  /// Every fetch fails with `err` once queued responses run out.
  pub fn failing(mut self, err: RemoteError) -> Self {
    self.fallback = Err(err);
    self
  }

  /// Result of create/update/delete. By default they echo their input.
  pub fn mutations(mut self, result: Result<Value, RemoteError>) -> Self {
    self.mutation = Some(result);
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn with_related(mut self, store: &str, key: &str) -> Self {
    self.related.push(RelatedCache::new(store, key));
    self
  }

  pub fn calls(&self) -> Arc<Calls> {
    Arc::clone(&self.calls)
  }

  async fn mutate(&self, echo: &Value) -> Result<Value, RemoteError> {
    tokio::time::sleep(self.delay).await;
    match &self.mutation {
      Some(result) => result.clone(),
      None => Ok(echo.clone()),
    }
  }
}

#[async_trait]
impl Resource for MockResource {
  fn kind(&self) -> ResourceKind {
    self.kind
  }

  fn related_caches(&self, _params: &Params) -> Vec<RelatedCache> {
    self.related.clone()
  }

  async fn fetch(&self, _params: &Params, options: &RequestOptions) -> Result<Value, RemoteError> {
    self.calls.fetch.fetch_add(1, Ordering::SeqCst);
    *self.calls.last_headers.lock().expect("mock lock") = options.headers.clone();
    tokio::time::sleep(self.delay).await;
    let queued = self.responses.lock().expect("mock lock").pop_front();
    queued.unwrap_or_else(|| self.fallback.clone())
  }

  async fn create(
    &self,
    _params: &Params,
    attrs: &Value,
    _options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    self.calls.create.fetch_add(1, Ordering::SeqCst);
    self.mutate(attrs).await
  }

  async fn update(
    &self,
    _params: &Params,
    attrs: &Value,
    _options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    self.calls.update.fetch_add(1, Ordering::SeqCst);
    self.mutate(attrs).await
  }

  async fn delete(
    &self,
    _params: &Params,
    record: &Value,
    _options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    self.calls.delete.fetch_add(1, Ordering::SeqCst);
    *self.calls.last_record.lock().expect("mock lock") = Some(record.clone());
    self.mutate(record).await
  }
}
