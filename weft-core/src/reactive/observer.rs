//! Container observation and field instrumentation.
//!
//! Observation attaches reactive plumbing to a plain value tree:
//!
//! 1. The container gets a shape dependency, notified when the container
//!    changes shape (list mutation, reactive key add or remove).
//!
//! 2. For maps, every current field is instrumented with its own
//!    dependency, and field values are recursively observed.
//!
//! 3. For lists, elements are recursively observed; there are no per-index
//!    dependencies.
//!
//! Observation is idempotent: a container is wrapped at most once, and the
//! observer is attached before children are walked so self-referential
//! data terminates. Primitives, frozen containers, and containers marked
//! raw are never observed, and nothing is attached while the runtime's
//! observing gate is toggled off.

use crate::error::ReactiveError;
use crate::value::{Field, ObservedList, ObservedMap, Value, WriteHook};

use super::dep::DepId;
use super::runtime::{Runtime, WeakRuntime};

/// Reactive state attached to one observed container.
#[derive(Clone)]
pub(crate) struct Observer {
    pub(crate) rt: WeakRuntime,
    /// The container's shape dependency.
    pub(crate) dep: DepId,
    /// How many scopes reference this container as root data. Root data
    /// refuses shape changes through `set_key`/`delete_key`.
    pub(crate) root_count: u32,
}

impl Runtime {
    /// Observe a value tree, idempotently.
    ///
    /// Returns true when the value carries an observer after the call,
    /// whether it was attached now or earlier. Primitive, frozen, and raw
    /// values return false. With `as_root` set, the container's root-data
    /// count is incremented.
    pub fn observe(&self, value: &Value, as_root: bool) -> bool {
        let attached = match value {
            Value::Map(map) => self.observe_map(map),
            Value::List(list) => self.observe_list(list),
            _ => false,
        };
        if attached && as_root {
            match value {
                Value::Map(map) => {
                    if let Some(obs) = map.inner.observer.write().as_mut() {
                        obs.root_count += 1;
                    }
                }
                Value::List(list) => {
                    if let Some(obs) = list.inner.observer.write().as_mut() {
                        obs.root_count += 1;
                    }
                }
                _ => {}
            }
        }
        attached
    }

    fn observe_map(&self, map: &ObservedMap) -> bool {
        if map.inner.observer.read().is_some() {
            return true;
        }
        if !self.is_observing() || map.is_frozen() || map.is_raw() {
            return false;
        }
        {
            let mut slot = map.inner.observer.write();
            if slot.is_some() {
                return true;
            }
            *slot = Some(Observer {
                rt: self.downgrade(),
                dep: self.create_dep(),
                root_count: 0,
            });
        }
        // attach before walking so self-referential data terminates
        let keys = map.keys();
        for key in keys {
            self.instrument_field(map, &key, None, None, false);
        }
        true
    }

    fn observe_list(&self, list: &ObservedList) -> bool {
        if list.inner.observer.read().is_some() {
            return true;
        }
        if !self.is_observing() || list.is_frozen() || list.is_raw() {
            return false;
        }
        {
            let mut slot = list.inner.observer.write();
            if slot.is_some() {
                return true;
            }
            *slot = Some(Observer {
                rt: self.downgrade(),
                dep: self.create_dep(),
                root_count: 0,
            });
        }
        let items = list.to_vec();
        for item in &items {
            self.observe(item, false);
        }
        true
    }

    /// Install a reactive field on a map.
    ///
    /// With `initial` as `None` the stored value is preserved; otherwise it
    /// is replaced. A field that already carries a dependency keeps it, so
    /// existing subscribers stay wired. `on_write` is invoked on every
    /// applied write in addition to the normal notification; `shallow`
    /// skips re-observing values written into the field.
    pub fn define_reactive_field(
        &self,
        map: &ObservedMap,
        key: &str,
        initial: Option<Value>,
        on_write: Option<WriteHook>,
        shallow: bool,
    ) {
        if map.is_frozen() {
            return;
        }
        if map.inner.observer.read().is_none() {
            // the field reports reads through the container's runtime
            // handle; attach a passive observer without walking the other
            // fields
            let mut slot = map.inner.observer.write();
            if slot.is_none() {
                *slot = Some(Observer {
                    rt: self.downgrade(),
                    dep: self.create_dep(),
                    root_count: 0,
                });
            }
        }
        self.instrument_field(map, key, initial, on_write, shallow);
    }

    fn instrument_field(
        &self,
        map: &ObservedMap,
        key: &str,
        initial: Option<Value>,
        on_write: Option<WriteHook>,
        shallow: bool,
    ) {
        let value = {
            let mut fields = map.inner.fields.write();
            let field = fields.entry(key.to_owned()).or_insert_with(|| Field {
                value: Value::Null,
                dep: None,
                shallow: false,
                on_write: None,
            });
            if let Some(initial) = initial {
                field.value = initial;
            }
            if field.dep.is_none() {
                field.dep = Some(self.create_dep());
            }
            field.shallow = shallow;
            field.on_write = on_write;
            field.value.clone()
        };
        if !shallow {
            self.observe(&value, false);
        }
    }

    /// Reactively add or replace a key on an already-observed target,
    /// covering keys that were not present at observation time.
    ///
    /// List targets take a numeric key and route through `splice`. Map
    /// targets with an existing key go through the normal accessor. Root
    /// data and raw containers refuse the shape change; unobserved maps
    /// degrade to a plain write with no reactivity.
    pub fn set_key(
        &self,
        target: &Value,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<Value, ReactiveError> {
        let value = value.into();
        match target {
            Value::List(list) => {
                let Ok(index) = key.parse::<usize>() else {
                    let err = ReactiveError::InvalidTarget { operation: "set" };
                    self.report(&err);
                    return Err(err);
                };
                let len = list.len_untracked();
                if index < len {
                    list.splice(index, 1, vec![value.clone()])?;
                } else {
                    // pad to the requested index, one shape notification
                    let mut inserted = vec![Value::Null; index - len];
                    inserted.push(value.clone());
                    list.splice(len, 0, inserted)?;
                }
                Ok(value)
            }
            Value::Map(map) => {
                if map.contains_key(key) {
                    map.set(key, value.clone())?;
                    return Ok(value);
                }
                let observer = map.inner.observer.read().clone();
                if map.is_raw() || observer.as_ref().is_some_and(|obs| obs.root_count > 0) {
                    let err = ReactiveError::RootDataMutation { operation: "add" };
                    self.report(&err);
                    return Err(err);
                }
                let Some(obs) = observer else {
                    map.insert(key, value.clone());
                    return Ok(value);
                };
                self.instrument_field(map, key, Some(value.clone()), None, false);
                self.notify(obs.dep)?;
                Ok(value)
            }
            _ => {
                let err = ReactiveError::InvalidTarget { operation: "set" };
                self.report(&err);
                Err(err)
            }
        }
    }

    /// Reactively remove a key, notifying the container's shape
    /// dependency. Removing a missing key is a no-op.
    pub fn delete_key(&self, target: &Value, key: &str) -> Result<(), ReactiveError> {
        match target {
            Value::List(list) => {
                let Ok(index) = key.parse::<usize>() else {
                    let err = ReactiveError::InvalidTarget { operation: "delete" };
                    self.report(&err);
                    return Err(err);
                };
                if index < list.len_untracked() {
                    list.splice(index, 1, Vec::new())?;
                }
                Ok(())
            }
            Value::Map(map) => {
                let observer = map.inner.observer.read().clone();
                if map.is_raw() || observer.as_ref().is_some_and(|obs| obs.root_count > 0) {
                    let err = ReactiveError::RootDataMutation { operation: "delete" };
                    self.report(&err);
                    return Err(err);
                }
                let removed = map.inner.fields.write().shift_remove(key).is_some();
                if !removed {
                    return Ok(());
                }
                match observer {
                    Some(obs) => self.notify(obs.dep),
                    None => Ok(()),
                }
            }
            _ => {
                let err = ReactiveError::InvalidTarget { operation: "delete" };
                self.report(&err);
                Err(err)
            }
        }
    }
}

/// Subscribe the active watcher to every element container reachable
/// through a list, recursing into nested lists.
///
/// List index reads cannot be intercepted per element, so reading a field
/// that holds a list subscribes to the whole element tree at once.
pub(crate) fn depend_list(rt: &Runtime, list: &ObservedList) {
    let items = list.to_vec();
    for item in &items {
        if let Some(obs) = item.observer() {
            rt.depend(obs.dep);
        }
        if let Value::List(nested) = item {
            depend_list(rt, nested);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_attaches_once() {
        let rt = Runtime::new();
        let map = ObservedMap::new();
        map.insert("a", 1);
        let value = Value::Map(map.clone());

        assert!(rt.observe(&value, false));
        let dep = map.inner.observer.read().as_ref().unwrap().dep;

        assert!(rt.observe(&value, false));
        assert_eq!(map.inner.observer.read().as_ref().unwrap().dep, dep);
    }

    #[test]
    fn observe_declines_primitives_frozen_and_raw() {
        let rt = Runtime::new();
        assert!(!rt.observe(&Value::from(1), false));
        assert!(!rt.observe(&Value::Null, false));

        let frozen = ObservedMap::new();
        frozen.freeze();
        assert!(!rt.observe(&Value::Map(frozen), false));

        let raw = ObservedMap::new();
        raw.mark_raw();
        assert!(!rt.observe(&Value::Map(raw), false));
    }

    #[test]
    fn observe_respects_the_observing_gate() {
        let rt = Runtime::new();
        let map = ObservedMap::new();

        rt.toggle_observing(false);
        assert!(!rt.observe(&Value::Map(map.clone()), false));

        rt.toggle_observing(true);
        assert!(rt.observe(&Value::Map(map), false));
    }

    #[test]
    fn observe_counts_root_references() {
        let rt = Runtime::new();
        let map = ObservedMap::new();
        let value = Value::Map(map.clone());

        rt.observe(&value, true);
        rt.observe(&value, true);
        assert_eq!(map.inner.observer.read().as_ref().unwrap().root_count, 2);
    }

    #[test]
    fn observe_instruments_nested_values() {
        let rt = Runtime::new();
        let inner = ObservedMap::new();
        inner.insert("b", 2);
        let map = ObservedMap::new();
        map.insert("a", inner.clone());
        rt.observe(&Value::Map(map.clone()), false);

        assert!(map.inner.fields.read().get("a").unwrap().dep.is_some());
        assert!(inner.inner.observer.read().is_some());
        assert!(inner.inner.fields.read().get("b").unwrap().dep.is_some());
    }

    #[test]
    fn set_key_refuses_root_data() {
        let rt = Runtime::new();
        let map = ObservedMap::new();
        let value = Value::Map(map);
        rt.observe(&value, true);

        let result = rt.set_key(&value, "late", 1);
        assert!(matches!(result, Err(ReactiveError::RootDataMutation { .. })));
    }

    #[test]
    fn set_key_on_plain_map_degrades_to_insert() {
        let rt = Runtime::new();
        let map = ObservedMap::new();
        let value = Value::Map(map.clone());

        rt.set_key(&value, "a", 1).unwrap();
        assert_eq!(map.get_untracked("a"), Value::from(1));
        assert!(map.inner.fields.read().get("a").unwrap().dep.is_none());
    }

    #[test]
    fn set_key_refuses_primitive_targets() {
        let rt = Runtime::new();
        let result = rt.set_key(&Value::from(1), "a", 2);
        assert!(matches!(result, Err(ReactiveError::InvalidTarget { .. })));
        let result = rt.delete_key(&Value::Null, "a");
        assert!(matches!(result, Err(ReactiveError::InvalidTarget { .. })));
    }

    #[test]
    fn set_key_pads_lists_past_the_end() {
        let rt = Runtime::new();
        let list: ObservedList = [1].into_iter().collect();
        let value = Value::List(list.clone());
        rt.observe(&value, false);

        rt.set_key(&value, "3", 9).unwrap();
        assert_eq!(list.len_untracked(), 4);
        assert_eq!(list.get_untracked(1), Value::Null);
        assert_eq!(list.get_untracked(3), Value::from(9));
    }

    #[test]
    fn delete_key_is_silent_on_missing_keys() {
        let rt = Runtime::new();
        let map = ObservedMap::new();
        map.insert("a", 1);
        let value = Value::Map(map.clone());
        rt.observe(&value, false);

        rt.delete_key(&value, "missing").unwrap();
        rt.delete_key(&value, "a").unwrap();
        assert!(!map.contains_key("a"));
    }
}
