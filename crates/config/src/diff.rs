//! Structural config diffing: which dotted paths changed between snapshots.

use serde_json::Value;

/// Compare two config values and return the dotted paths whose values differ.
///
/// Paths are reported at the deepest object level that differs; array changes
/// report the array's own path. Additions and removals count as changes.
pub fn diff_paths(prev: &Value, next: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk("", prev, next, &mut out);
    out.sort();
    out
}

fn walk(prefix: &str, prev: &Value, next: &Value, out: &mut Vec<String>) {
    match (prev, next) {
        (Value::Object(a), Value::Object(b)) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let child = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match (a.get(key), b.get(key)) {
                    (Some(pa), Some(pb)) => walk(&child, pa, pb, out),
                    (None, Some(_)) | (Some(_), None) => out.push(child),
                    (None, None) => {},
                }
            }
        },
        (a, b) => {
            if a != b {
                out.push(prefix.to_string());
            }
        },
    }
}
