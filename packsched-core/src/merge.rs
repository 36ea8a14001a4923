//! Structural merge of configuration trees
//!
//! Config documents are held as [`serde_json::Value`]. When several sources
//! provide the same top-level key, their values are folded together in
//! lexical source order:
//!
//! | Base | Overlay | Result |
//! |------|---------|--------|
//! | object | object | key-by-key, recursively; overlay wins on conflicting leaves |
//! | array | array | base elements followed by overlay elements |
//! | anything | anything else | overlay replaces base |

use serde_json::Value;
use std::collections::BTreeMap;

/// Merge `overlay` into `base` in place.
pub fn merge_into(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_into(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(base_items), Value::Array(overlay_items)) => {
            base_items.extend(overlay_items);
        }
        (base, overlay) => *base = overlay,
    }
}

/// Merge per-source top-level documents into one map of key -> merged value.
///
/// `sources` is keyed by source identifier, so iteration is already in
/// lexical source order.
pub fn merge_sources<'a, I>(sources: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = &'a serde_json::Map<String, Value>>,
{
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    for document in sources {
        for (key, value) in document {
            match merged.get_mut(key) {
                Some(existing) => merge_into(existing, value.clone()),
                None => {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test documents must be objects"),
        }
    }

    #[test]
    fn test_later_source_wins_leaf_conflict() {
        let mut sources = BTreeMap::new();
        sources.insert("b", doc(json!({"options": {"verbose": true, "nested": {"x": 2}}})));
        sources.insert("a", doc(json!({"options": {"verbose": false, "nested": {"x": 1, "y": 1}, "only_a": 1}})));

        let merged = merge_sources(sources.values());
        assert_eq!(
            merged["options"],
            json!({"verbose": true, "nested": {"x": 2, "y": 1}, "only_a": 1})
        );
    }

    #[test]
    fn test_arrays_concatenate_without_dedup() {
        let mut sources = BTreeMap::new();
        sources.insert("b", doc(json!({"tags": ["x", "y"]})));
        sources.insert("a", doc(json!({"tags": ["x", "z", "x"]})));

        let merged = merge_sources(sources.values());
        assert_eq!(merged["tags"], json!(["x", "z", "x", "x", "y"]));
    }

    #[test]
    fn test_type_mismatch_takes_overlay() {
        let mut base = json!({"k": [1, 2]});
        merge_into(&mut base, json!({"k": {"now": "object"}}));
        assert_eq!(base, json!({"k": {"now": "object"}}));

        let mut base = json!("scalar");
        merge_into(&mut base, json!(null));
        assert_eq!(base, Value::Null);
    }

    #[test]
    fn test_disjoint_keys_are_kept() {
        let a = doc(json!({"events": {"disable": true}}));
        let b = doc(json!({"options": {"host_id": "h1"}}));

        let merged = merge_sources([&a, &b]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["events"], json!({"disable": true}));
    }
}
