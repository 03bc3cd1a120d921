//! Store construction options.

use std::time::Duration;

/// Statuses absorbed by `fetch` unless configured otherwise.
pub const DEFAULT_ALLOWED_STATUS_CODES: [u16; 2] = [401, 403];

/// How long an in-flight fetch record outlives its completion.
pub const DEFAULT_FETCH_GRACE_PERIOD: Duration = Duration::from_millis(50);

/// How long a pair stays blocked after a fetch failed with a disallowed status.
pub const DEFAULT_DISABLE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
  /// Forwarded as a `Cookie` header on every remote call.
  pub cookie: Option<String>,
  /// Resolve `fetch` with the best current value and deliver the network
  /// result through `fetch` events instead.
  pub instant_resolve: bool,
  /// Mark affected caches stale after successful create/update/delete.
  pub auto_clear_caches: bool,
  /// Fetch failures with these statuses resolve with cached or empty data.
  pub allowed_status_codes: Vec<u16>,
  /// Field used to match collection members across re-fetches.
  pub identifier: String,
  pub fetch_grace_period: Duration,
  pub disable_window: Duration,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      cookie: None,
      instant_resolve: false,
      auto_clear_caches: true,
      allowed_status_codes: DEFAULT_ALLOWED_STATUS_CODES.to_vec(),
      identifier: "id".to_string(),
      fetch_grace_period: DEFAULT_FETCH_GRACE_PERIOD,
      disable_window: DEFAULT_DISABLE_WINDOW,
    }
  }
}

impl StoreOptions {
  pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
    self.cookie = Some(cookie.into());
    self
  }

  pub fn with_instant_resolve(mut self, instant_resolve: bool) -> Self {
    self.instant_resolve = instant_resolve;
    self
  }

  pub fn with_auto_clear_caches(mut self, auto_clear_caches: bool) -> Self {
    self.auto_clear_caches = auto_clear_caches;
    self
  }

  /// Replace the allowed statuses. Duplicates are dropped, first occurrence wins.
  pub fn with_allowed_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
    let mut allowed = Vec::new();
    for code in codes {
      if !allowed.contains(&code) {
        allowed.push(code);
      }
    }
    self.allowed_status_codes = allowed;
    self
  }

  pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
    self.identifier = identifier.into();
    self
  }

  pub fn with_fetch_grace_period(mut self, period: Duration) -> Self {
    self.fetch_grace_period = period;
    self
  }

  pub fn with_disable_window(mut self, window: Duration) -> Self {
    self.disable_window = window;
    self
  }

  /// Whether a failure with `status` degrades to "no data" instead of erroring.
  pub fn is_allowed_status(&self, status: Option<u16>) -> bool {
    status.is_some_and(|s| self.allowed_status_codes.contains(&s))
  }
}
