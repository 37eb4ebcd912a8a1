//! Dot-path lookup into arbitrary JSON, e.g. `data.images.0.b64`.

use serde_json::Value;

/// Walks `path` through `value`. Object keys are matched by name, array
/// elements by decimal index. Returns `None` when any segment is missing.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(value, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}
