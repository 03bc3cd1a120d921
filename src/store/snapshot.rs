//! JSON snapshot of the cache tree for server to client handoff.

use tracing::{info, warn};

use super::state::CacheTree;
use super::Store;

impl Store {
  /// Serialize every cached `(resource, key, value)` triple.
  ///
  /// Stale, ongoing and disabled markers are not part of the snapshot.
  pub fn snapshot(&self) -> String {
    let state = self.state();
    match serde_json::to_string(state.tree()) {
      Ok(json) => json,
      Err(e) => {
        warn!(error = %e, "failed to serialize cache snapshot");
        "{}".to_string()
      }
    }
  }

  /// Replace the whole cache with a snapshot.
  ///
  /// Empty, malformed or mis-shaped input leaves the store untouched and
  /// returns `false`.
  pub fn bootstrap(&self, json: &str) -> bool {
    if json.trim().is_empty() {
      warn!("empty snapshot, nothing to bootstrap");
      return false;
    }

    let tree: CacheTree = match serde_json::from_str(json) {
      Ok(tree) => tree,
      Err(e) => {
        warn!(error = %e, "malformed snapshot ignored");
        return false;
      }
    };

    if let Some((store, key)) = self.mismatched_entry(&tree) {
      warn!(store, cache_key = key, "snapshot entry has the wrong shape, ignored");
      return false;
    }

    let entries: usize = tree.values().map(|keys| keys.len()).sum();
    self
      .state()
      .replace_tree(tree, self.inner.resources.names());
    info!(entries, "cache bootstrapped from snapshot");
    true
  }

  /// First entry whose value does not fit its registered resource kind.
  fn mismatched_entry<'a>(&self, tree: &'a CacheTree) -> Option<(&'a str, &'a str)> {
    tree.iter().find_map(|(store, entries)| {
      let kind = self.inner.resources.get(store)?.kind();
      entries
        .iter()
        .find(|(_, value)| !value.is_null() && !kind.accepts(value))
        .map(|(key, _)| (store.as_str(), key.as_str()))
    })
  }
}
