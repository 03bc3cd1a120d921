//! Resource descriptor backed by a JSON HTTP API.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde_json::Value;
use std::fmt;
use url::{form_urlencoded, Url};

use super::{Params, RelatedCache, RemoteError, RequestOptions, Resource, ResourceKind};

const JSON_CONTENT_TYPE: &str = "application/json;charset=utf-8";

/// Path template with `:name` placeholders, e.g. `/cars/:id`.
///
/// A `:` not followed by an identifier start (as in `http://` or `:8080`) is
/// kept literally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
  source: String,
  parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
  Literal(String),
  Param(String),
}

impl Template {
  pub fn parse(source: &str) -> Self {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
      let starts_param = c == ':'
        && chars
          .peek()
          .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_');
      if !starts_param {
        literal.push(c);
        continue;
      }

      if !literal.is_empty() {
        parts.push(Part::Literal(std::mem::take(&mut literal)));
      }
      let mut name = String::new();
      while let Some(n) = chars.peek() {
        if n.is_ascii_alphanumeric() || *n == '_' {
          name.push(*n);
          chars.next();
        } else {
          break;
        }
      }
      parts.push(Part::Param(name));
    }

    if !literal.is_empty() {
      parts.push(Part::Literal(literal));
    }

    Self {
      source: source.to_string(),
      parts,
    }
  }

  /// Substitute params verbatim. Returns `None` if any placeholder has no value.
  pub fn render(&self, params: &Params) -> Option<String> {
    self.render_with(params, |value| value)
  }

  /// Substitute params as percent-encoded path segments, so `/`, `?` and `#`
  /// in a value stay inside its segment.
  pub fn render_path(&self, params: &Params) -> Option<String> {
    self.render_with(params, |value| {
      form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
    })
  }

  fn render_with(&self, params: &Params, encode: impl Fn(String) -> String) -> Option<String> {
    let mut out = String::new();
    for part in &self.parts {
      match part {
        Part::Literal(s) => out.push_str(s),
        Part::Param(name) => out.push_str(&encode(super::param_str(params, name)?)),
      }
    }
    Some(out)
  }
}

impl fmt::Display for Template {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.source)
  }
}

/// A collection or model served from `base` + `url` template.
///
/// `fetch` issues GET, `create` POST, `update` PUT and `delete` DELETE.
#[derive(Debug, Clone)]
pub struct HttpResource {
  client: reqwest::Client,
  base: Url,
  kind: ResourceKind,
  url: Template,
  cache_key: Option<Template>,
  related: Vec<(String, Template)>,
  headers: Vec<(String, String)>,
}

impl HttpResource {
  pub fn new(client: reqwest::Client, base: Url, kind: ResourceKind, url: &str) -> Self {
    Self {
      client,
      base,
      kind,
      url: Template::parse(url),
      cache_key: None,
      related: Vec::new(),
      headers: Vec::new(),
    }
  }

  /// Override the default cache key derivation with a template.
  pub fn with_cache_key(mut self, template: &str) -> Self {
    self.cache_key = Some(Template::parse(template));
    self
  }

  /// Declare a related cache entry; `key` may contain placeholders.
  pub fn with_related(mut self, store: impl Into<String>, key: &str) -> Self {
    self.related.push((store.into(), Template::parse(key)));
    self
  }

  /// Static headers sent with every request.
  pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
    self.headers.extend(headers);
    self
  }

  async fn send(
    &self,
    method: Method,
    params: &Params,
    body: Option<&Value>,
    options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    let path = self
      .url
      .render_path(params)
      .ok_or_else(|| RemoteError::transport(format!("missing params for url {}", self.url)))?;
    let url = self
      .base
      .join(&path)
      .map_err(|e| RemoteError::transport(format!("invalid url {}: {}", path, e)))?;

    tracing::debug!(method = %method, url = %url, "remote request");

    let mut req = self
      .client
      .request(method, url)
      .header(CONTENT_TYPE, JSON_CONTENT_TYPE);
    for (name, value) in self.headers.iter().chain(options.headers.iter()) {
      req = req.header(name.as_str(), value.as_str());
    }
    if let Some(body) = body {
      req = req.body(body.to_string());
    }

    let resp = req
      .send()
      .await
      .map_err(|e| RemoteError::transport(e.to_string()))?;
    let status = resp.status();
    let text = resp
      .text()
      .await
      .map_err(|e| RemoteError::transport(e.to_string()))?;

    if !status.is_success() {
      return Err(RemoteError::new(status.as_u16(), text));
    }
    if text.trim().is_empty() {
      return Ok(Value::Null);
    }
    serde_json::from_str(&text)
      .map_err(|e| RemoteError::transport(format!("failed to parse body: {}", e)))
  }
}

#[async_trait]
impl Resource for HttpResource {
  fn kind(&self) -> ResourceKind {
    self.kind
  }

  fn cache_key(&self, params: &Params) -> Option<String> {
    match &self.cache_key {
      Some(template) => template.render(params),
      None => self.kind.default_cache_key(params),
    }
  }

  fn related_caches(&self, params: &Params) -> Vec<RelatedCache> {
    self
      .related
      .iter()
      .filter_map(|(store, key)| key.render(params).map(|k| RelatedCache::new(store.clone(), k)))
      .collect()
  }

  async fn fetch(&self, params: &Params, options: &RequestOptions) -> Result<Value, RemoteError> {
    self.send(Method::GET, params, None, options).await
  }

  async fn create(
    &self,
    params: &Params,
    attrs: &Value,
    options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    self.send(Method::POST, params, Some(attrs), options).await
  }

  async fn update(
    &self,
    params: &Params,
    attrs: &Value,
    options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    self.send(Method::PUT, params, Some(attrs), options).await
  }

  async fn delete(
    &self,
    params: &Params,
    record: &Value,
    options: &RequestOptions,
  ) -> Result<Value, RemoteError> {
    // Fields of the record fill placeholders the params leave open.
    let mut merged = params.clone();
    if let Value::Object(fields) = record {
      for (k, v) in fields {
        merged.entry(k.clone()).or_insert_with(|| v.clone());
      }
    }
    self.send(Method::DELETE, &merged, None, options).await
  }
}
