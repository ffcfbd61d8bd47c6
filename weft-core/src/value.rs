//! Observed value model.
//!
//! Reactive state is a dynamic tree of [`Value`]s. Leaves are plain
//! primitives; interior nodes are [`ObservedMap`] (string-keyed fields) and
//! [`ObservedList`] (ordered elements). Both container types are cheap-clone
//! handles over shared storage, so a `Value` behaves like a reference into
//! the tree rather than a snapshot of it.
//!
//! # How Tracking Hooks In
//!
//! Containers start out inert: reads and writes are plain data operations.
//! Once a tree is handed to [`crate::reactive::Runtime::observe`], each map
//! field gets its own dependency and each container gets a "shape"
//! dependency. From then on:
//!
//! 1. `ObservedMap::get` registers the reading watcher with the field's
//!    dependency (and the child container's shape dependency, and, for list
//!    values, every nested element container's shape dependency, since list
//!    index reads cannot be intercepted per element).
//!
//! 2. `ObservedMap::set` short-circuits when the value is unchanged, stores,
//!    re-observes the new value, and notifies the field's dependency.
//!
//! 3. The list mutators (`push`, `pop`, `shift`, `unshift`, `splice`,
//!    `sort_by`, `reverse`) perform the mutation, observe newly inserted
//!    elements, and notify the list's shape dependency.
//!
//! Field access goes through these explicit accessors everywhere; there is
//! no implicit property trapping.
//!
//! # Thread Safety
//!
//! The containers are `Send + Sync` and internally locked, but the engine's
//! execution model is single-threaded and cooperative: no lock is ever held
//! while user code runs.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::ReactiveError;
use crate::reactive::dep::DepId;
use crate::reactive::observer::{depend_list, Observer};
use crate::reactive::runtime::Runtime;

/// Hook invoked on every applied write to a reactive field, in addition to
/// the normal dependency notification. Installed through
/// [`crate::reactive::Runtime::define_reactive_field`].
pub type WriteHook = Arc<dyn Fn() + Send + Sync>;

/// A node in the observed value tree.
#[derive(Clone)]
pub enum Value {
    /// The absent value. Missing map keys read as `Null`.
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Map(ObservedMap),
    List(ObservedList),
}

impl Value {
    /// True for `Map` and `List` values.
    ///
    /// Containers are special in two places: they can be observed, and a
    /// watcher over a container fires even when the handle is unchanged,
    /// because the contents may have mutated in place.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Map(_) | Value::List(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The change-detection equality used by setters and watchers.
    ///
    /// Containers compare by handle identity, primitives by value. Two NaN
    /// numbers compare as unchanged, so writing NaN over NaN does not
    /// notify.
    pub fn same(a: &Value, b: &Value) -> bool {
        if let (Value::Number(x), Value::Number(y)) = (a, b) {
            return x == y || (x.is_nan() && y.is_nan());
        }
        a == b
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&ObservedMap> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&ObservedList> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Snapshot of the container observer, if this value is an observed
    /// container.
    pub(crate) fn observer(&self) -> Option<Observer> {
        match self {
            Value::Map(m) => m.inner.observer.read().clone(),
            Value::List(l) => l.inner.observer.read().clone(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            (Value::List(a), Value::List(b)) => Arc::ptr_eq(&a.inner, &b.inner),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            // containers print shallow to stay cycle-safe
            Value::Map(m) => fmt::Debug::fmt(m, f),
            Value::List(l) => fmt::Debug::fmt(l, f),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Number(v as f64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<ObservedMap> for Value {
    fn from(v: ObservedMap) -> Self {
        Value::Map(v)
    }
}

impl From<ObservedList> for Value {
    fn from(v: ObservedList) -> Self {
        Value::List(v)
    }
}

/// One field slot of an [`ObservedMap`].
pub(crate) struct Field {
    pub(crate) value: Value,
    /// Present once the field has been instrumented by `observe` or
    /// `define_reactive_field`. Fields added by plain `insert` after
    /// observation stay untracked until instrumented.
    pub(crate) dep: Option<DepId>,
    /// Shallow fields do not re-observe values written into them.
    pub(crate) shallow: bool,
    pub(crate) on_write: Option<WriteHook>,
}

pub(crate) struct MapInner {
    pub(crate) fields: RwLock<IndexMap<String, Field>>,
    /// Attached once by the runtime; `None` while the map is plain data.
    pub(crate) observer: RwLock<Option<Observer>>,
    pub(crate) frozen: AtomicBool,
    pub(crate) raw: AtomicBool,
}

/// A string-keyed reactive container.
///
/// Cloning the handle shares storage, so every clone sees the same fields
/// and the same observer.
#[derive(Clone)]
pub struct ObservedMap {
    pub(crate) inner: Arc<MapInner>,
}

impl ObservedMap {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MapInner {
                fields: RwLock::new(IndexMap::new()),
                observer: RwLock::new(None),
                frozen: AtomicBool::new(false),
                raw: AtomicBool::new(false),
            }),
        }
    }

    /// Plain insert, no reactivity.
    ///
    /// This is the builder operation used before a tree is observed. A key
    /// inserted after observation is untracked until it goes through
    /// [`crate::reactive::Runtime::set_key`].
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.fields.write().insert(
            key.into(),
            Field {
                value: value.into(),
                dep: None,
                shallow: false,
                on_write: None,
            },
        );
    }

    /// Read a field, registering the active watcher with the field's
    /// dependency and the child container's shape dependency.
    ///
    /// Missing keys read as [`Value::Null`]. A read with no active watcher
    /// is a plain read.
    pub fn get(&self, key: &str) -> Value {
        let (value, dep) = {
            let fields = self.inner.fields.read();
            match fields.get(key) {
                Some(field) => (field.value.clone(), field.dep),
                None => (Value::Null, None),
            }
        };
        if let Some(dep) = dep {
            if let Some(rt) = self.runtime() {
                if rt.is_tracking() {
                    rt.depend(dep);
                    if let Some(child) = value.observer() {
                        rt.depend(child.dep);
                        if let Value::List(list) = &value {
                            // list index reads cannot be intercepted, so a
                            // field read subscribes to every element
                            // container reachable through nested lists
                            depend_list(&rt, list);
                        }
                    }
                }
            }
        }
        value
    }

    /// Read a field without registering any dependency.
    pub fn get_untracked(&self, key: &str) -> Value {
        let fields = self.inner.fields.read();
        fields
            .get(key)
            .map(|field| field.value.clone())
            .unwrap_or(Value::Null)
    }

    /// Write a field through its reactive accessor.
    ///
    /// No-op when the new value is [`Value::same`] as the current one (the
    /// both-NaN case included) or when the map is frozen. Writing a key that
    /// does not exist degrades to a plain untracked insert; use
    /// [`crate::reactive::Runtime::set_key`] for a reactive add.
    ///
    /// The returned error is the failure of a `sync` watcher run from the
    /// notification, propagated to the writer.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), ReactiveError> {
        let value = value.into();
        if self.is_frozen() {
            return Ok(());
        }
        let slot = {
            let fields = self.inner.fields.read();
            fields
                .get(key)
                .map(|field| (field.value.clone(), field.dep, field.shallow, field.on_write.clone()))
        };
        let Some((old, dep, shallow, on_write)) = slot else {
            self.insert(key, value);
            return Ok(());
        };
        if Value::same(&value, &old) {
            return Ok(());
        }
        if let Some(on_write) = on_write {
            on_write();
        }
        {
            let mut fields = self.inner.fields.write();
            if let Some(field) = fields.get_mut(key) {
                field.value = value.clone();
            }
        }
        if let Some(dep) = dep {
            if let Some(rt) = self.runtime() {
                if !shallow {
                    rt.observe(&value, false);
                }
                rt.notify(dep)?;
            }
        }
        Ok(())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.fields.read().contains_key(key)
    }

    /// Current keys, in insertion order. Not a tracked read.
    pub fn keys(&self) -> Vec<String> {
        self.inner.fields.read().keys().cloned().collect()
    }

    /// Number of fields. Not a tracked read.
    pub fn len(&self) -> usize {
        self.inner.fields.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the map: no further writes apply and the map is never newly
    /// observed.
    pub fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    /// Mark the map as framework-internal. Raw containers are skipped by
    /// observation, traversal, and key mutation helpers.
    pub fn mark_raw(&self) {
        self.inner.raw.store(true, Ordering::Release);
    }

    pub fn is_raw(&self) -> bool {
        self.inner.raw.load(Ordering::Acquire)
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        let observer = self.inner.observer.read();
        observer
            .as_ref()
            .and_then(|obs| obs.rt.upgrade())
            .map(Runtime::from_inner)
    }
}

impl Default for ObservedMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObservedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedMap")
            .field("len", &self.len())
            .field("observed", &self.inner.observer.read().is_some())
            .finish()
    }
}

pub(crate) struct ListInner {
    pub(crate) items: RwLock<Vec<Value>>,
    pub(crate) observer: RwLock<Option<Observer>>,
    pub(crate) frozen: AtomicBool,
    pub(crate) raw: AtomicBool,
}

/// An ordered reactive container.
///
/// Elements carry no per-index dependencies. The list is tracked through
/// one shape dependency, notified by the named mutators, plus per-element
/// observation of container elements.
#[derive(Clone)]
pub struct ObservedList {
    pub(crate) inner: Arc<ListInner>,
}

impl ObservedList {
    pub fn new() -> Self {
        Self::from_values(Vec::new())
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            inner: Arc::new(ListInner {
                items: RwLock::new(values.into_iter().collect()),
                observer: RwLock::new(None),
                frozen: AtomicBool::new(false),
                raw: AtomicBool::new(false),
            }),
        }
    }

    /// Length, registered as a container-level read on the shape
    /// dependency when a watcher is active.
    pub fn len(&self) -> usize {
        let len = self.inner.items.read().len();
        self.track_shape_read();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one element, registered as a container-level read. Out of range
    /// reads as [`Value::Null`].
    pub fn get(&self, index: usize) -> Value {
        let value = self
            .inner
            .items
            .read()
            .get(index)
            .cloned()
            .unwrap_or(Value::Null);
        self.track_shape_read();
        value
    }

    pub fn len_untracked(&self) -> usize {
        self.inner.items.read().len()
    }

    pub fn get_untracked(&self, index: usize) -> Value {
        self.inner
            .items
            .read()
            .get(index)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Untracked snapshot of the elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.read().clone()
    }

    pub fn push(&self, value: impl Into<Value>) -> Result<(), ReactiveError> {
        if self.is_frozen() {
            return Ok(());
        }
        let value = value.into();
        self.inner.items.write().push(value.clone());
        self.mutated(std::slice::from_ref(&value))
    }

    pub fn pop(&self) -> Result<Option<Value>, ReactiveError> {
        if self.is_frozen() {
            return Ok(None);
        }
        let removed = self.inner.items.write().pop();
        self.mutated(&[])?;
        Ok(removed)
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Result<Option<Value>, ReactiveError> {
        if self.is_frozen() {
            return Ok(None);
        }
        let removed = {
            let mut items = self.inner.items.write();
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        };
        self.mutated(&[])?;
        Ok(removed)
    }

    /// Insert an element at the front.
    pub fn unshift(&self, value: impl Into<Value>) -> Result<(), ReactiveError> {
        if self.is_frozen() {
            return Ok(());
        }
        let value = value.into();
        self.inner.items.write().insert(0, value.clone());
        self.mutated(std::slice::from_ref(&value))
    }

    /// Remove `delete_count` elements starting at `start` and insert
    /// `inserted` in their place. Returns the removed elements. Ranges are
    /// clamped to the current length.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        inserted: Vec<Value>,
    ) -> Result<Vec<Value>, ReactiveError> {
        if self.is_frozen() {
            return Ok(Vec::new());
        }
        let removed = {
            let mut items = self.inner.items.write();
            let start = start.min(items.len());
            let end = (start + delete_count).min(items.len());
            items.splice(start..end, inserted.iter().cloned()).collect()
        };
        self.mutated(&inserted)?;
        Ok(removed)
    }

    pub fn sort_by<F>(&self, compare: F) -> Result<(), ReactiveError>
    where
        F: FnMut(&Value, &Value) -> std::cmp::Ordering,
    {
        if self.is_frozen() {
            return Ok(());
        }
        self.inner.items.write().sort_by(compare);
        self.mutated(&[])
    }

    pub fn reverse(&self) -> Result<(), ReactiveError> {
        if self.is_frozen() {
            return Ok(());
        }
        self.inner.items.write().reverse();
        self.mutated(&[])
    }

    pub fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Acquire)
    }

    /// See [`ObservedMap::mark_raw`].
    pub fn mark_raw(&self) {
        self.inner.raw.store(true, Ordering::Release);
    }

    pub fn is_raw(&self) -> bool {
        self.inner.raw.load(Ordering::Acquire)
    }

    fn track_shape_read(&self) {
        let observer = self.inner.observer.read().clone();
        if let Some(obs) = observer {
            if let Some(rt) = obs.rt.upgrade().map(Runtime::from_inner) {
                if rt.is_tracking() {
                    rt.depend(obs.dep);
                }
            }
        }
    }

    /// Post-mutation bookkeeping: observe inserted elements, then notify
    /// the shape dependency. A plain (unobserved) list skips both.
    fn mutated(&self, inserted: &[Value]) -> Result<(), ReactiveError> {
        let observer = self.inner.observer.read().clone();
        let Some(obs) = observer else {
            return Ok(());
        };
        let Some(rt) = obs.rt.upgrade().map(Runtime::from_inner) else {
            return Ok(());
        };
        for value in inserted {
            rt.observe(value, false);
        }
        rt.notify(obs.dep)
    }
}

impl Default for ObservedList {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Into<Value>> FromIterator<V> for ObservedList {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_values(iter.into_iter().map(Into::into))
    }
}

impl fmt::Debug for ObservedList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservedList")
            .field("len", &self.len_untracked())
            .field("observed", &self.inner.observer.read().is_some())
            .finish()
    }
}
