use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::resource::{HttpResource, Registry, ResourceKind};
use crate::store::{
  StoreOptions, DEFAULT_ALLOWED_STATUS_CODES, DEFAULT_DISABLE_WINDOW, DEFAULT_FETCH_GRACE_PERIOD,
};

/// Environment variable overriding `store.cookie`.
pub const COOKIE_ENV: &str = "CEREBELLUM_COOKIE";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub store: StoreConfig,
  /// Resource name -> descriptor
  #[serde(default)]
  pub resources: BTreeMap<String, ResourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL resource paths are resolved against
  pub base_url: String,
  /// Extra headers sent with every request
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  /// Request timeout in milliseconds (no timeout if not set)
  pub timeout_ms: Option<u64>,
}

/// Store options as written in the config file. Durations are milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub cookie: Option<String>,
  pub instant_resolve: bool,
  pub auto_clear_caches: bool,
  pub allowed_status_codes: Vec<u16>,
  pub identifier: String,
  pub fetch_grace_period_ms: u64,
  pub disable_window_ms: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      cookie: None,
      instant_resolve: false,
      auto_clear_caches: true,
      allowed_status_codes: DEFAULT_ALLOWED_STATUS_CODES.to_vec(),
      identifier: "id".to_string(),
      fetch_grace_period_ms: DEFAULT_FETCH_GRACE_PERIOD.as_millis() as u64,
      disable_window_ms: DEFAULT_DISABLE_WINDOW.as_millis() as u64,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
  pub kind: ResourceKind,
  /// Path template, e.g. `/cars/:id`
  pub url: String,
  /// Cache key template; defaults to `:id` (or `/` for collections)
  pub cache_key: Option<String>,
  #[serde(default)]
  pub related_caches: Vec<RelatedCacheConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelatedCacheConfig {
  pub store: String,
  pub cache_key: String,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cerebellum.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cerebellum/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cerebellum/config.yaml \
         or pass --config."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("cerebellum.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cerebellum").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config.validate()?;

    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {:?}: {}", self.api.base_url, e))?;

    for (name, resource) in &self.resources {
      for related in &resource.related_caches {
        if !self.resources.contains_key(&related.store) {
          return Err(eyre!(
            "Resource {} declares related cache in unknown resource {}",
            name,
            related.store
          ));
        }
      }
    }
    Ok(())
  }

  /// Cookie to forward: `CEREBELLUM_COOKIE` wins over `store.cookie`.
  pub fn cookie(&self) -> Option<String> {
    self.cookie_with_env(std::env::var(COOKIE_ENV).ok())
  }

  fn cookie_with_env(&self, env: Option<String>) -> Option<String> {
    env
      .filter(|c| !c.is_empty())
      .or_else(|| self.store.cookie.clone())
  }

  pub fn store_options(&self) -> StoreOptions {
    let store = &self.store;
    let mut options = StoreOptions::default()
      .with_instant_resolve(store.instant_resolve)
      .with_auto_clear_caches(store.auto_clear_caches)
      .with_allowed_status_codes(store.allowed_status_codes.iter().copied())
      .with_identifier(store.identifier.clone())
      .with_fetch_grace_period(Duration::from_millis(store.fetch_grace_period_ms))
      .with_disable_window(Duration::from_millis(store.disable_window_ms));
    options.cookie = self.cookie();
    options
  }

  /// Build an HTTP resource for every configured resource.
  pub fn registry(&self) -> Result<Registry> {
    let base = Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {:?}: {}", self.api.base_url, e))?;

    let mut builder = reqwest::Client::builder();
    if let Some(ms) = self.api.timeout_ms {
      builder = builder.timeout(Duration::from_millis(ms));
    }
    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let headers: Vec<(String, String)> = self
      .api
      .headers
      .iter()
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect();

    let mut registry = Registry::new();
    for (name, res) in &self.resources {
      let mut resource = HttpResource::new(client.clone(), base.clone(), res.kind, &res.url)
        .with_headers(headers.clone());
      if let Some(key) = &res.cache_key {
        resource = resource.with_cache_key(key);
      }
      for related in &res.related_caches {
        resource = resource.with_related(related.store.clone(), &related.cache_key);
      }
      registry = registry.register(name.clone(), resource);
    }
    Ok(registry)
  }
}
