//! Subcommands of the `cerebellum` binary.

use clap::{Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use cerebellum::{Action, Params, Store};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Fetch one resource and print it as JSON
  Fetch {
    resource: String,
    /// Request params as key=value
    params: Vec<String>,
  },
  /// Fetch several resources concurrently, e.g. `cars car:id=Ferrari`
  FetchAll {
    #[arg(required = true)]
    targets: Vec<String>,
  },
  /// Fetch the given resources, then print the cache snapshot
  Snapshot { targets: Vec<String> },
  /// Seed the cache from a snapshot file
  Bootstrap {
    file: PathBuf,
    /// Print the cached value of this resource instead of a summary
    #[arg(long)]
    resource: Option<String>,
    /// Params for --resource as key=value
    params: Vec<String>,
  },
  /// Create, update, delete or expire a record
  Dispatch {
    action: Mutation,
    resource: String,
    /// Request params as key=value
    params: Vec<String>,
    /// Record attributes as a JSON object (create and update)
    #[arg(long)]
    attrs: Option<String>,
  },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
  Create,
  Update,
  Delete,
  Expire,
}

impl Command {
  /// Run against `store`, returning what should be printed.
  pub async fn run(self, store: &Store) -> Result<String> {
    match self {
      Command::Fetch { resource, params } => {
        let value = store.fetch(&resource, &parse_params(&params)?).await?;
        pretty(&value)
      }
      Command::FetchAll { targets } => {
        let requests = parse_targets(&targets)?;
        let values = store.fetch_all(requests).await?;
        pretty(&values)
      }
      Command::Snapshot { targets } => {
        let requests = parse_targets(&targets)?;
        if !requests.is_empty() {
          store.fetch_all(requests).await?;
        }
        Ok(store.snapshot())
      }
      Command::Bootstrap {
        file,
        resource,
        params,
      } => {
        let contents = std::fs::read_to_string(&file)
          .map_err(|e| eyre!("Failed to read snapshot {}: {}", file.display(), e))?;
        if !store.bootstrap(&contents) {
          return Err(eyre!("Snapshot {} was rejected", file.display()));
        }
        info!(file = %file.display(), "bootstrapped");

        match resource {
          Some(resource) => {
            let value = store.fetch(&resource, &parse_params(&params)?).await?;
            pretty(&value)
          }
          None => {
            let summary: BTreeMap<&str, Vec<String>> = store
              .resources()
              .names()
              .map(|name| (name, store.cache_keys(name)))
              .collect();
            pretty(&summary)
          }
        }
      }
      Command::Dispatch {
        action,
        resource,
        params,
        attrs,
      } => {
        let action = build_action(action, resource, parse_params(&params)?, attrs.as_deref())?;
        let result = store.dispatch(action).await?;
        pretty(&result)
      }
    }
  }
}

fn pretty<T: serde::Serialize>(value: &T) -> Result<String> {
  serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))
}

/// Parse `key=value`. Values are JSON when they parse as such, else strings.
pub fn parse_param(arg: &str) -> Result<(String, Value)> {
  let (key, raw) = arg
    .split_once('=')
    .ok_or_else(|| eyre!("Invalid param {:?}, expected key=value", arg))?;
  if key.is_empty() {
    return Err(eyre!("Invalid param {:?}, empty key", arg));
  }
  let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
  Ok((key.to_string(), value))
}

pub fn parse_params<S: AsRef<str>>(args: &[S]) -> Result<Params> {
  args.iter().map(|a| parse_param(a.as_ref())).collect()
}

/// Parse `resource` or `resource:key=value,key=value`.
pub fn parse_target(target: &str) -> Result<(String, Params)> {
  match target.split_once(':') {
    None => Ok((target.to_string(), Params::new())),
    Some((resource, rest)) => {
      let pairs: Vec<&str> = rest.split(',').filter(|p| !p.is_empty()).collect();
      Ok((resource.to_string(), parse_params(&pairs)?))
    }
  }
}

fn parse_targets(targets: &[String]) -> Result<Vec<(String, Params)>> {
  targets.iter().map(|s| parse_target(s)).collect()
}

pub fn build_action(
  mutation: Mutation,
  store: String,
  params: Params,
  attrs: Option<&str>,
) -> Result<Action> {
  let parse_attrs = || -> Result<Value> {
    let raw = attrs.ok_or_else(|| eyre!("--attrs is required for {:?}", mutation))?;
    let value: Value =
      serde_json::from_str(raw).map_err(|e| eyre!("Invalid --attrs JSON: {}", e))?;
    if !value.is_object() {
      return Err(eyre!("--attrs must be a JSON object"));
    }
    Ok(value)
  };

  Ok(match mutation {
    Mutation::Create => Action::Create {
      store,
      params,
      attrs: parse_attrs()?,
    },
    Mutation::Update => Action::Update {
      store,
      params,
      attrs: parse_attrs()?,
    },
    Mutation::Delete => Action::Delete { store, params },
    Mutation::Expire => Action::Expire { store, params },
  })
}
