//! Client-side data store over remote collections and models.
//!
//! A [`Store`] caches values per `(resource, cache key)`, shares in-flight
//! fetches between callers, applies mutations optimistically and can be
//! serialized to a JSON snapshot and bootstrapped from one.

pub mod config;
pub mod error;
pub mod events;
pub mod resource;
pub mod store;

pub use error::{RemoteError, StoreError};
pub use events::{ActionKind, EventBus, EventOutcome, EventPayload, HandlerId};
pub use resource::{
  to_params, HttpResource, Params, Registry, RelatedCache, RequestOptions, Resource, ResourceKind,
};
pub use store::{Action, CacheId, CacheResult, CacheSource, Store, StoreOptions};
