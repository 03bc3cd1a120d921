//! Error types shared by the store and resource descriptors.

use thiserror::Error;

use crate::resource::Params;

/// Failure reported by a remote capability (fetch/create/update/delete).
///
/// `status` is `None` when the request never produced an HTTP response
/// (connection refused, DNS failure, unsupported operation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe_remote(.status, .data))]
pub struct RemoteError {
  pub status: Option<u16>,
  pub data: String,
}

impl RemoteError {
  /// Error carrying an HTTP status and the response body.
  pub fn new(status: u16, data: impl Into<String>) -> Self {
    Self {
      status: Some(status),
      data: data.into(),
    }
  }

  /// Error for a request that produced no HTTP response.
  pub fn transport(data: impl Into<String>) -> Self {
    Self {
      status: None,
      data: data.into(),
    }
  }

  /// Error for a capability the resource does not implement.
  pub fn unsupported(operation: &str) -> Self {
    Self::transport(format!("{} is not supported by this resource", operation))
  }

  pub fn status(&self) -> Option<u16> {
    self.status
  }
}

fn describe_remote(status: &Option<u16>, data: &str) -> String {
  match status {
    Some(status) => format!("remote request failed with status {}: {}", status, data),
    None => format!("remote request failed: {}", data),
  }
}

/// Errors surfaced by [`crate::Store`] operations.
///
/// Cloneable so a single in-flight fetch outcome can be handed to every
/// caller that joined it.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
  #[error("Store {0} not registered.")]
  UnregisteredStore(String),

  #[error("Store {0} has no cache key for the given params.")]
  NoCacheKey(String),

  #[error("You can call create only for collections! (store '{0}')")]
  NotACollection(String),

  #[error("You can call {action} only for models! (store '{store}')")]
  NotAModel { store: String, action: &'static str },

  #[error("Fetching store '{store}' failed: {}", describe_remote(.status, .data))]
  RemoteFetch {
    store: String,
    status: Option<u16>,
    data: String,
  },

  #[error("{} '{store}' failed", mutation_verb(.action))]
  RemoteMutation {
    action: &'static str,
    store: String,
    params: Params,
    #[source]
    source: RemoteError,
  },

  #[error("fetch task for store '{store}' did not complete: {message}")]
  TaskFailed { store: String, message: String },
}

impl StoreError {
  /// HTTP status carried by a remote failure, if any.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::RemoteFetch { status, .. } => *status,
      Self::RemoteMutation { source, .. } => source.status,
      _ => None,
    }
  }

  /// Store name the error refers to.
  pub fn store(&self) -> &str {
    match self {
      Self::UnregisteredStore(store)
      | Self::NoCacheKey(store)
      | Self::NotACollection(store)
      | Self::NotAModel { store, .. }
      | Self::RemoteFetch { store, .. }
      | Self::RemoteMutation { store, .. }
      | Self::TaskFailed { store, .. } => store,
    }
  }

  pub(crate) fn remote_fetch(store: &str, err: RemoteError) -> Self {
    Self::RemoteFetch {
      store: store.to_string(),
      status: err.status,
      data: err.data,
    }
  }
}

fn mutation_verb(action: &str) -> &'static str {
  match action {
    "create" => "Creating new item to store",
    "update" => "Updating",
    "delete" => "Deleting",
    _ => "Mutating",
  }
}
