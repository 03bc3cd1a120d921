//! Reconciling fetched values into cached ones.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::resource::ResourceKind;

/// Fold a freshly fetched value into the cached one.
pub fn reconcile(kind: ResourceKind, previous: &Value, fresh: Value, identifier: &str) -> Value {
  match kind {
    ResourceKind::Model => merge_fields(previous, fresh),
    ResourceKind::Collection => reconcile_collection(previous, fresh, identifier),
  }
}

/// Shallow merge: fields of `fresh` win, fields only in `previous` survive.
///
/// Non-object values are replaced outright.
pub fn merge_fields(previous: &Value, fresh: Value) -> Value {
  match (previous, fresh) {
    (Value::Object(old), Value::Object(new)) => {
      let mut out = old.clone();
      for (k, v) in new {
        out.insert(k, v);
      }
      Value::Object(out)
    }
    (_, fresh) => fresh,
  }
}

/// Match members by `identifier`.
///
/// Existing members keep their position and take the fresh fields, members
/// missing upstream are dropped, and fresh members not seen before are
/// appended in upstream order.
pub fn reconcile_collection(previous: &Value, fresh: Value, identifier: &str) -> Value {
  let (Value::Array(old), Value::Array(new)) = (previous, fresh.clone()) else {
    return fresh;
  };

  let mut incoming: Vec<Option<Value>> = new.into_iter().map(Some).collect();
  let mut positions: HashMap<String, usize> = HashMap::new();
  for (pos, member) in incoming.iter().enumerate() {
    if let Some(id) = member.as_ref().and_then(|m| member_id(m, identifier)) {
      positions.entry(id).or_insert(pos);
    }
  }

  let mut out = Vec::with_capacity(incoming.len());
  for member in old {
    let Some(id) = member_id(member, identifier) else {
      continue;
    };
    let matched = positions
      .get(&id)
      .and_then(|&pos| incoming.get_mut(pos))
      .and_then(Option::take);
    if let Some(fresh_member) = matched {
      out.push(merge_fields(member, fresh_member));
    }
  }
  out.extend(incoming.into_iter().flatten());

  Value::Array(out)
}

/// Recursive merge used for optimistic updates.
pub fn deep_merge(base: &Value, patch: &Value) -> Value {
  match (base, patch) {
    (Value::Object(b), Value::Object(p)) => {
      let mut out: Map<String, Value> = b.clone();
      for (k, v) in p {
        let merged = match out.get(k) {
          Some(existing) => deep_merge(existing, v),
          None => v.clone(),
        };
        out.insert(k.clone(), merged);
      }
      Value::Object(out)
    }
    _ => patch.clone(),
  }
}

/// Identifier of a collection member as comparable text. `1` and `"1"` differ.
fn member_id(member: &Value, identifier: &str) -> Option<String> {
  match member.get(identifier)? {
    Value::Null => None,
    id => Some(id.to_string()),
  }
}
