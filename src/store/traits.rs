//! Fetch results annotated with where the data came from.

/// Result from a fetch, including data and metadata about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn new(data: T, source: CacheSource) -> Self {
    Self { data, source }
  }

  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self::new(data, CacheSource::Network)
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, is_stale: bool) -> Self {
    let source = if is_stale {
      CacheSource::CacheStale
    } else {
      CacheSource::CacheFresh
    };
    Self::new(data, source)
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Cached data handed out while a network fetch is still pending
  CacheStale,
  /// Cached or empty data served because the pair is temporarily disabled
  Disabled,
  /// Empty placeholder or previous value after an allowed error status
  Placeholder,
}
