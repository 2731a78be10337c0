//! Path operations over a JSON tree with realtime-database semantics:
//! `null` and empty objects are absent, and removing the last child of an
//! object removes the object.

use serde_json::{Map, Value};

static NULL: Value = Value::Null;

pub fn get_at<'a>(root: &'a Value, segs: &[String]) -> &'a Value {
    let mut node = root;
    for seg in segs {
        match node.get(seg.as_str()) {
            Some(child) => node = child,
            None => return &NULL,
        }
    }
    node
}

pub fn set_at(root: &mut Value, segs: &[String], value: Value) {
    if is_absent(&value) {
        remove_at(root, segs);
        return;
    }
    let Some((last, parents)) = segs.split_last() else {
        *root = value;
        return;
    };
    let mut node = root;
    for seg in parents {
        node = ensure_object(node)
            .entry(seg.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(last.clone(), value);
}

pub fn remove_at(root: &mut Value, segs: &[String]) {
    let Some((first, rest)) = segs.split_first() else {
        *root = Value::Null;
        return;
    };
    let now_empty = match root {
        Value::Object(map) => {
            if rest.is_empty() {
                map.remove(first);
            } else if let Some(child) = map.get_mut(first) {
                remove_at(child, rest);
                if child.is_null() {
                    map.remove(first);
                }
            }
            map.is_empty()
        }
        _ => false,
    };
    if now_empty {
        *root = Value::Null;
    }
}

/// Apply a multi-location update: each key of `patch` is a path relative
/// to `segs`.
pub fn merge_at(root: &mut Value, segs: &[String], patch: Map<String, Value>) {
    for (key, value) in patch {
        let mut path = segs.to_vec();
        path.extend(key.split('/').filter(|s| !s.is_empty()).map(str::to_string));
        set_at(root, &path, value);
    }
}

/// True when a write at one path can change the value seen at the other.
pub fn overlaps(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn ensure_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}
