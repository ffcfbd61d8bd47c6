//! Deep traversal for `deep` watchers.
//!
//! Traversal forces a full recursive read of a value while a watcher is on
//! the active stack, so the normal read-time hooks subscribe that watcher
//! to every nested dependency. The seen-set is call-scoped, which makes
//! reentrant traversal (a read during traversal starting another
//! traversal) safe by construction.

use std::collections::HashSet;

use crate::value::Value;

use super::dep::DepId;

/// Recursively touch every nested field of `value`.
///
/// Observed containers are visited at most once per call, keyed by their
/// shape dependency id, so shared and cyclic structures terminate. Frozen
/// and raw containers are not descended into.
pub fn traverse(value: &Value) {
    let mut seen: HashSet<DepId> = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<DepId>) {
    match value {
        Value::Map(map) => {
            if map.is_frozen() || map.is_raw() {
                return;
            }
            if let Some(obs) = value.observer() {
                if !seen.insert(obs.dep) {
                    return;
                }
            }
            let keys = map.keys();
            for key in keys.iter().rev() {
                let child = map.get(key);
                traverse_inner(&child, seen);
            }
        }
        Value::List(list) => {
            if list.is_frozen() || list.is_raw() {
                return;
            }
            if let Some(obs) = value.observer() {
                if !seen.insert(obs.dep) {
                    return;
                }
            }
            for index in (0..list.len()).rev() {
                let item = list.get(index);
                traverse_inner(&item, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::runtime::Runtime;
    use crate::value::ObservedMap;

    #[test]
    fn terminates_on_cyclic_observed_data() {
        let rt = Runtime::new();
        let map = ObservedMap::new();
        map.insert("leaf", 1);
        rt.observe(&Value::Map(map.clone()), false);
        // self-reference added after observation; plain insert keeps it
        // untracked but traverse still descends into it
        map.insert("me", map.clone());

        traverse(&Value::Map(map));
    }

    #[test]
    fn skips_frozen_containers() {
        let frozen = ObservedMap::new();
        frozen.insert("x", 1);
        frozen.freeze();
        // would recurse forever if the freeze guard did not stop descent
        frozen.insert("me", frozen.clone());
        traverse(&Value::Map(frozen));
    }
}
