//! Structural diffing of JSON documents.

use serde_json::{Map, Value};

use crate::patch::merge_key;

/// Compute the paths at which `desired` differs from `live`.
///
/// Missing fields, nulls, empty objects & empty lists are all treated as equal, since the API
/// server drops empty values. Merge-keyed lists are compared item by item on their merge key.
/// Paths listed in `ignore` (dotted, relative to the root) are skipped along with everything below
/// them.
pub fn diff(live: &Value, desired: &Value, ignore: &[&str]) -> Vec<String> {
    let mut paths = vec![];
    diff_at("", "", live, desired, ignore, &mut paths);
    paths
}

fn diff_at(path: &str, field: &str, live: &Value, desired: &Value, ignore: &[&str], out: &mut Vec<String>) {
    if ignore.contains(&path) {
        return;
    }
    match (is_empty(live), is_empty(desired)) {
        (true, true) => return,
        (true, false) | (false, true) => {
            out.push(path.to_string());
            return;
        }
        _ => (),
    }
    match (live, desired) {
        (Value::Object(_), _) | (_, Value::Object(_)) if is_object_or_empty(live) && is_object_or_empty(desired) => {
            let (empty_live, empty_desired) = (Map::new(), Map::new());
            let live = live.as_object().unwrap_or(&empty_live);
            let desired = desired.as_object().unwrap_or(&empty_desired);
            let mut fields: Vec<&String> = live.keys().chain(desired.keys()).collect();
            fields.sort();
            fields.dedup();
            for name in fields {
                let child = join(path, name);
                diff_at(&child, name, live.get(name).unwrap_or(&Value::Null), desired.get(name).unwrap_or(&Value::Null), ignore, out);
            }
        }
        (Value::Array(_), _) | (_, Value::Array(_)) if is_array_or_empty(live) && is_array_or_empty(desired) => {
            let live = live.as_array().map(Vec::as_slice).unwrap_or_default();
            let desired = desired.as_array().map(Vec::as_slice).unwrap_or_default();
            diff_list(path, field, live, desired, ignore, out);
        }
        _ if live == desired => (),
        _ => out.push(path.to_string()),
    }
}

fn diff_list(path: &str, field: &str, live: &[Value], desired: &[Value], ignore: &[&str], out: &mut Vec<String>) {
    let key = merge_key(field, live.iter().chain(desired.iter()))
        .filter(|key| live.iter().chain(desired.iter()).all(|item| item.get(*key).is_some()));
    match key {
        Some(key) => {
            for item in desired {
                let id = &item[key];
                let child = format!("{}[{}={}]", path, key, display_id(id));
                let existing = live.iter().find(|existing| &existing[key] == id).unwrap_or(&Value::Null);
                diff_at(&child, "", existing, item, ignore, out);
            }
            for item in live.iter().filter(|item| !desired.iter().any(|d| d[key] == item[key])) {
                out.push(format!("{}[{}={}]", path, key, display_id(&item[key])));
            }
        }
        None => {
            for idx in 0..live.len().max(desired.len()) {
                let child = format!("{}[{}]", path, idx);
                diff_at(&child, "", live.get(idx).unwrap_or(&Value::Null), desired.get(idx).unwrap_or(&Value::Null), ignore, out);
            }
        }
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

fn display_id(id: &Value) -> String {
    match id {
        Value::String(val) => val.clone(),
        other => other.to_string(),
    }
}

fn is_empty(val: &Value) -> bool {
    match val {
        Value::Null => true,
        Value::Object(map) => map.values().all(is_empty),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn is_object_or_empty(val: &Value) -> bool {
    val.is_object() || is_empty(val)
}

fn is_array_or_empty(val: &Value) -> bool {
    val.is_array() || is_empty(val)
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn equal_documents_have_no_diff() {
        let doc = json!({"replicas": 1, "template": {"spec": {"containers": [{"name": "a", "image": "img"}]}}});

        let paths = diff(&doc, &doc.clone(), &[]);

        assert!(paths.is_empty(), "expected no diff got {:?}", paths);
    }

    #[test]
    fn empty_values_are_equivalent() {
        let live = json!({"template": {"metadata": {}, "spec": {"containers": [{"name": "a"}]}}});
        let desired = json!({"template": {"metadata": {"labels": null}, "spec": {"containers": [{"name": "a", "env": []}], "volumes": null}}});

        let paths = diff(&live, &desired, &[]);

        assert!(paths.is_empty(), "expected no diff got {:?}", paths);
    }

    #[test]
    fn ignored_paths_are_skipped() {
        let live = json!({"replicas": 5, "paused": false});
        let desired = json!({"replicas": 1, "paused": true});

        let paths = diff(&live, &desired, &["replicas"]);

        assert_eq!(paths, vec!["paused".to_string()]);
    }

    #[test]
    fn keyed_lists_report_item_paths() {
        let live = json!({"containers": [{"name": "a", "env": [{"name": "A", "value": "1"}, {"name": "B", "value": "2"}]}]});
        let desired = json!({"containers": [{"name": "a", "env": [{"name": "A", "value": "3"}]}]});

        let paths = diff(&live, &desired, &[]);

        assert_eq!(paths, vec!["containers[name=a].env[name=A].value".to_string(), "containers[name=a].env[name=B]".to_string()]);
    }

    #[test]
    fn atomic_lists_compare_positionally() {
        let live = json!({"args": ["--a", "--b"]});
        let desired = json!({"args": ["--a", "--c", "--d"]});

        let paths = diff(&live, &desired, &[]);

        assert_eq!(paths, vec!["args[1]".to_string(), "args[2]".to_string()]);
    }
}
