//! Strategic merge patches over generic JSON trees.
//!
//! Lists known to the Kubernetes API as merge-keyed (containers by `name`, volume mounts by
//! `mountPath` & so on) are merged item by item. All other lists are atomic & replaced as a whole.
//!
//! Patches come in two flavors. `StrategicPatch::diff` is non-destructive: a field absent from the
//! desired document is left as it is on the live object, which suits objects carrying fields
//! assigned by the server. `StrategicPatch::replace` converges on the desired document exactly:
//! dropped map keys are cleared with `null` & dropped list items get a `$patch: delete` marker.
//! Markers may also be added by hand with `StrategicPatch::remove_list_item`.

use serde_json::{Map, Value};

use crate::error::{GraphError, GraphResult};

/// The key of a patch directive.
pub const PATCH_DIRECTIVE: &str = "$patch";
/// The directive value deleting a list item.
pub const DELETE_DIRECTIVE: &str = "delete";

/// A step along a path into a patch document.
#[derive(Clone, Debug, PartialEq)]
pub enum PathSegment {
    /// An object field.
    Field(String),
    /// The item of a merge-keyed list whose `key` field equals `value`.
    Item { list: String, key: String, value: Value },
}

impl PathSegment {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }

    pub fn item(list: impl Into<String>, key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Item {
            list: list.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Whether fields missing from the desired document are removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DiffMode {
    Merge,
    Replace,
}

/// A strategic merge patch document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrategicPatch {
    body: Map<String, Value>,
}

impl StrategicPatch {
    /// Build a patch which, applied to `original`, produces the fields of `modified`.
    ///
    /// Only fields which differ are emitted. Fields missing or null in `modified` are never
    /// cleared, and list items missing from `modified` are never deleted.
    pub fn diff(original: &Value, modified: &Value) -> GraphResult<Self> {
        match (original, modified) {
            (Value::Object(original), Value::Object(modified)) => Ok(Self {
                body: diff_object(original, modified, DiffMode::Merge),
            }),
            _ => Err(GraphError::PatchConstruction("patch documents must be JSON objects".into())),
        }
    }

    /// Build a patch which, applied to `original`, produces exactly `modified`.
    ///
    /// Fields missing or null in `modified` are cleared, and items of merge-keyed lists missing
    /// from `modified` are deleted. Deletion markers follow all other items of their list.
    pub fn replace(original: &Value, modified: &Value) -> GraphResult<Self> {
        match (original, modified) {
            (Value::Object(original), Value::Object(modified)) => Ok(Self {
                body: diff_object(original, modified, DiffMode::Replace),
            }),
            _ => Err(GraphError::PatchConstruction("patch documents must be JSON objects".into())),
        }
    }

    /// Mark the item of list `list` under `parent` whose `key` equals `value` for deletion.
    ///
    /// Intermediate objects & list items are created as needed. Any patch entry already present
    /// for the item is replaced by the deletion marker, which is appended after all other items.
    pub fn remove_list_item(&mut self, parent: &[PathSegment], list: &str, key: &str, value: impl Into<Value>) -> GraphResult<()> {
        let value = value.into();
        let mut target = &mut self.body;
        for segment in parent {
            target = match segment {
                PathSegment::Field(name) => child_object(target, name)?,
                PathSegment::Item { list, key, value } => list_item(target, list, key, value)?,
            };
        }
        let items = child_list(target, list)?;
        items.retain(|item| item.get(key) != Some(&value));
        items.push(delete_marker(key, value));
        Ok(())
    }

    /// Check if this patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// The patch document.
    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

/// The merge key of the given list field, if the list is merged item by item.
///
/// `ports` is keyed by `containerPort` on containers & by `port` on Services.
pub fn merge_key<'a>(list: &str, mut items: impl Iterator<Item = &'a Value>) -> Option<&'static str> {
    match list {
        "containers" | "initContainers" | "ephemeralContainers" | "env" | "volumes" | "imagePullSecrets" => Some("name"),
        "volumeMounts" => Some("mountPath"),
        "volumeDevices" => Some("devicePath"),
        "conditions" => Some("type"),
        "ownerReferences" => Some("uid"),
        "hostAliases" => Some("ip"),
        "ports" => {
            if items.any(|item| item.get("containerPort").is_some()) {
                Some("containerPort")
            } else {
                Some("port")
            }
        }
        _ => None,
    }
}

/// Apply a strategic merge patch to the given document, as the API server would.
pub fn apply(original: &Value, patch: &Value) -> GraphResult<Value> {
    match (original, patch) {
        (Value::Object(original), Value::Object(patch)) => Ok(Value::Object(apply_object(original, patch)?)),
        _ => Err(GraphError::PatchConstruction("patch documents must be JSON objects".into())),
    }
}

//////////////////////////////////////////////////////////////////////////////
// Diff //////////////////////////////////////////////////////////////////////

fn diff_object(original: &Map<String, Value>, modified: &Map<String, Value>, mode: DiffMode) -> Map<String, Value> {
    let mut delta = Map::new();
    for (field, new) in modified {
        if is_empty_value(new) {
            if !original.contains_key(field) || new.is_null() {
                continue;
            }
        }
        match original.get(field) {
            None | Some(Value::Null) => {
                delta.insert(field.clone(), new.clone());
            }
            Some(old) => {
                if let Some(changed) = diff_value(field, old, new, mode) {
                    delta.insert(field.clone(), changed);
                }
            }
        }
    }
    if mode == DiffMode::Replace {
        for (field, old) in original {
            let dropped = modified.get(field).map(Value::is_null).unwrap_or(true);
            if dropped && !is_empty_value(old) {
                delta.insert(field.clone(), Value::Null);
            }
        }
    }
    delta
}

fn diff_value(field: &str, old: &Value, new: &Value, mode: DiffMode) -> Option<Value> {
    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let delta = diff_object(old, new, mode);
            if delta.is_empty() {
                None
            } else {
                Some(Value::Object(delta))
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => match keyed_list(field, old_items, new_items) {
            Some(key) => diff_keyed_list(key, old_items, new_items, mode),
            None if old_items == new_items => None,
            None => Some(new.clone()),
        },
        _ if old == new => None,
        _ => Some(new.clone()),
    }
}

fn diff_keyed_list(key: &str, old_items: &[Value], new_items: &[Value], mode: DiffMode) -> Option<Value> {
    let mut delta = vec![];
    for item in new_items {
        let id = &item[key];
        match old_items.iter().find(|old| &old[key] == id) {
            None => delta.push(item.clone()),
            Some(old) => {
                if let Some(Value::Object(mut changed)) = diff_value(key, old, item, mode) {
                    changed.insert(key.to_string(), id.clone());
                    delta.push(Value::Object(changed));
                }
            }
        }
    }
    if mode == DiffMode::Replace {
        let dropped = old_items.iter().filter(|old| !new_items.iter().any(|item| item[key] == old[key]));
        delta.extend(dropped.map(|old| delete_marker(key, old[key].clone())));
    }
    if delta.is_empty() {
        None
    } else {
        Some(Value::Array(delta))
    }
}

/// The merge key of a list, when every item of both sides carries it.
fn keyed_list(field: &str, old_items: &[Value], new_items: &[Value]) -> Option<&'static str> {
    let key = merge_key(field, old_items.iter().chain(new_items.iter()))?;
    let all_keyed = old_items.iter().chain(new_items.iter()).all(|item| item.get(key).is_some());
    if all_keyed {
        Some(key)
    } else {
        None
    }
}

fn delete_marker(key: &str, value: Value) -> Value {
    let mut marker = Map::new();
    marker.insert(key.to_string(), value);
    marker.insert(PATCH_DIRECTIVE.into(), DELETE_DIRECTIVE.into());
    Value::Object(marker)
}

fn is_empty_value(val: &Value) -> bool {
    match val {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

//////////////////////////////////////////////////////////////////////////////
// Path Navigation ///////////////////////////////////////////////////////////

fn child_object<'a>(parent: &'a mut Map<String, Value>, name: &str) -> GraphResult<&'a mut Map<String, Value>> {
    let entry = parent.entry(name.to_string()).or_insert_with(|| Value::Object(Map::new()));
    if entry.is_null() {
        *entry = Value::Object(Map::new());
    }
    entry
        .as_object_mut()
        .ok_or_else(|| GraphError::PatchConstruction(format!("patch field {} is not an object", name)))
}

fn child_list<'a>(parent: &'a mut Map<String, Value>, name: &str) -> GraphResult<&'a mut Vec<Value>> {
    let entry = parent.entry(name.to_string()).or_insert_with(|| Value::Array(vec![]));
    if entry.is_null() {
        *entry = Value::Array(vec![]);
    }
    entry
        .as_array_mut()
        .ok_or_else(|| GraphError::PatchConstruction(format!("patch field {} is not a list", name)))
}

fn list_item<'a>(parent: &'a mut Map<String, Value>, list: &str, key: &str, value: &Value) -> GraphResult<&'a mut Map<String, Value>> {
    let items = child_list(parent, list)?;
    let pos = match items.iter().position(|item| item.get(key) == Some(value)) {
        Some(pos) => pos,
        None => {
            let mut item = Map::new();
            item.insert(key.to_string(), value.clone());
            items.push(Value::Object(item));
            items.len() - 1
        }
    };
    items[pos]
        .as_object_mut()
        .ok_or_else(|| GraphError::PatchConstruction(format!("item {}={} of patch list {} is not an object", key, value, list)))
}

//////////////////////////////////////////////////////////////////////////////
// Apply /////////////////////////////////////////////////////////////////////

fn apply_object(original: &Map<String, Value>, patch: &Map<String, Value>) -> GraphResult<Map<String, Value>> {
    let mut merged = original.clone();
    for (field, val) in patch {
        if field.starts_with('$') {
            continue;
        }
        if val.is_null() {
            merged.remove(field);
            continue;
        }
        let new = match (merged.get(field), val) {
            (Some(Value::Object(old)), Value::Object(new)) => Value::Object(apply_object(old, new)?),
            (Some(Value::Array(old)), Value::Array(new)) => match merge_key(field, old.iter().chain(new.iter())) {
                Some(key) => Value::Array(apply_keyed_list(field, key, old, new)?),
                None => strip_directives(val),
            },
            _ => strip_directives(val),
        };
        merged.insert(field.clone(), new);
    }
    Ok(merged)
}

fn apply_keyed_list(field: &str, key: &str, old: &[Value], patch: &[Value]) -> GraphResult<Vec<Value>> {
    let mut merged = old.to_vec();
    for item in patch {
        let id = item
            .get(key)
            .ok_or_else(|| GraphError::PatchConstruction(format!("item of list {} has no merge key {}", field, key)))?;
        let pos = merged.iter().position(|existing| existing.get(key) == Some(id));
        if is_delete(item) {
            if let Some(pos) = pos {
                merged.remove(pos);
            }
            continue;
        }
        match (pos, item) {
            (Some(pos), Value::Object(new)) => {
                let updated = match &merged[pos] {
                    Value::Object(existing) => Value::Object(apply_object(existing, new)?),
                    _ => strip_directives(item),
                };
                merged[pos] = updated;
            }
            _ => merged.push(strip_directives(item)),
        }
    }
    Ok(merged)
}

fn is_delete(item: &Value) -> bool {
    item.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some(DELETE_DIRECTIVE)
}

/// Drop directives from a value which is inserted as is.
fn strip_directives(val: &Value) -> Value {
    match val {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(field, _)| !field.starts_with('$'))
                .map(|(field, val)| (field.clone(), strip_directives(val)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().filter(|item| !is_delete(item)).map(strip_directives).collect()),
        other => other.clone(),
    }
}
