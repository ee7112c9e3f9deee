//! Path operations on JSON trees with realtime-database semantics
//!
//! `null` and empty objects do not exist as stored values: writing either
//! removes the node, and parents left empty disappear with it.

use serde_json::{Map, Value};

use crate::util::path_segments;

/// Value stored at `path`, if any.
pub fn value_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in path_segments(path) {
        node = node.as_object()?.get(segment)?;
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Replace the value at `path`; `null` deletes it.
pub fn set_at(root: &mut Value, path: &str, value: Value) {
    let segments = path_segments(path);
    set_segments(root, &segments, prune(value));
}

/// Write each entry of `fields` below `path`. Keys may themselves be
/// slash-separated paths.
pub fn merge_at(root: &mut Value, path: &str, fields: Map<String, Value>) {
    let base = path.trim_end_matches('/');
    for (key, value) in fields {
        set_at(root, &format!("{base}/{key}"), value);
    }
}

fn set_segments(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(children) = node else {
        return;
    };

    let child = children.entry((*first).to_string()).or_insert(Value::Null);
    set_segments(child, rest, value);
    if child.is_null() {
        children.remove(*first);
    }
    if children.is_empty() {
        *node = Value::Null;
    }
}

/// Drop `null` members and empty objects recursively.
fn prune(value: Value) -> Value {
    match value {
        Value::Object(children) => {
            let children = children
                .into_iter()
                .map(|(key, child)| (key, prune(child)))
                .filter(|(_, child)| !child.is_null())
                .collect::<Map<_, _>>();
            if children.is_empty() {
                Value::Null
            } else {
                Value::Object(children)
            }
        }
        other => other,
    }
}
