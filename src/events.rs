//! Observer registry for store action results.
//!
//! Every action publishes twice: once under its per-resource name
//! (`update:car`) and once under the unified name (`update`). Handlers receive
//! `Ok(payload)` for successful actions and `Err(error)` for failures.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::error::StoreError;
use crate::resource::Params;
use crate::store::lock;

/// Actions whose results are published on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
  Create,
  Update,
  Delete,
  Expire,
  Fetch,
}

impl ActionKind {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Create => "create",
      Self::Update => "update",
      Self::Delete => "delete",
      Self::Expire => "expire",
      Self::Fetch => "fetch",
    }
  }

  /// Per-resource event name, e.g. `create:cars`.
  pub fn event_name(self, store: &str) -> String {
    format!("{}:{}", self.as_str(), store)
  }
}

impl fmt::Display for ActionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Successful action result.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
  pub store: String,
  pub cache_key: Option<String>,
  pub params: Params,
  /// Created/updated record, deleted record, or fetched value.
  pub result: Option<Value>,
}

pub type EventOutcome = Result<EventPayload, StoreError>;

/// Handle returned by [`EventBus::on`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&EventOutcome) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
  handlers: Mutex<HashMap<String, Vec<(HandlerId, Handler)>>>,
  next_id: AtomicU64,
}

impl EventBus {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register `handler` for events named `name`.
  pub fn on<F>(&self, name: impl Into<String>, handler: F) -> HandlerId
  where
    F: Fn(&EventOutcome) + Send + Sync + 'static,
  {
    let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));
    lock(&self.handlers, "events.on")
      .entry(name.into())
      .or_default()
      .push((id, Arc::new(handler)));
    id
  }

  /// Remove a handler. Returns false if it was not registered.
  pub fn off(&self, id: HandlerId) -> bool {
    let mut handlers = lock(&self.handlers, "events.off");
    let mut removed = false;
    for list in handlers.values_mut() {
      let before = list.len();
      list.retain(|(h, _)| *h != id);
      removed |= list.len() != before;
    }
    handlers.retain(|_, list| !list.is_empty());
    removed
  }

  /// Call every handler registered for `name`.
  ///
  /// Handlers run outside the registry lock, so they may register or
  /// remove handlers themselves.
  pub fn trigger(&self, name: &str, outcome: &EventOutcome) {
    let handlers: Vec<Handler> = lock(&self.handlers, "events.trigger")
      .get(name)
      .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
      .unwrap_or_default();

    if handlers.is_empty() {
      trace!(event = name, "no handlers for event");
      return;
    }
    for handler in handlers {
      handler(outcome);
    }
  }

  /// Publish under both the per-resource and the unified event name.
  pub fn publish(&self, action: ActionKind, store: &str, outcome: EventOutcome) {
    self.trigger(&action.event_name(store), &outcome);
    self.trigger(action.as_str(), &outcome);
  }
}

impl fmt::Debug for EventBus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names: Vec<String> = lock(&self.handlers, "events.debug").keys().cloned().collect();
    f.debug_struct("EventBus").field("events", &names).finish()
  }
}
