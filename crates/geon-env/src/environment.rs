//! Chained environments holding the bindings visible while a graph is being built.
//!
//! An [`Environment`] owns three independent mappings (general values, the resolved-axes
//! cache and the tensor-strides cache) plus an optional parent. Reads walk the parent chain
//! and return the nearest binding; writes only ever touch the environment they are issued
//! on, so a child can shadow an ancestor's binding without disturbing it.
//!
//! The parent link is a strong reference: a child keeps every ancestor alive even after the
//! ancestor's own scope has been popped from the thread-local stack.

use std::any::{type_name, Any};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::iter;
use std::rc::Rc;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{Namespace, Result, ScopeError};

/// Opaque payload stored in an environment.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Per-dimension stride metadata cached for a tensor.
pub type Strides = SmallVec<[isize; 4]>;

/// Opaque identity of a tensor, used to key the axes and strides caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorKey(pub u64);

impl From<u64> for TensorKey {
    fn from(id: u64) -> Self {
        TensorKey(id)
    }
}

impl fmt::Display for TensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor#{}", self.0)
    }
}

struct EnvironmentInner {
    parent: Option<Environment>,
    values: RefCell<HashMap<String, Value>>,
    resolved_tensor_axes: RefCell<HashMap<TensorKey, Value>>,
    tensor_strides: RefCell<HashMap<TensorKey, Strides>>,
}

impl Drop for EnvironmentInner {
    // Unlinks ancestors one at a time so dropping a long chain does not recurse.
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        while let Some(environment) = parent {
            match Rc::try_unwrap(environment.inner) {
                Ok(mut inner) => parent = inner.parent.take(),
                Err(_) => break,
            }
        }
    }
}

/// Shared handle to a chained environment.
///
/// Cloning the handle does not copy the bindings; both clones observe the same mappings.
#[derive(Clone)]
pub struct Environment {
    inner: Rc<EnvironmentInner>,
}

impl Environment {
    /// Creates an empty environment chained to `parent` (a root when `None`).
    pub fn new(parent: Option<Environment>) -> Self {
        Environment {
            inner: Rc::new(EnvironmentInner {
                parent,
                values: RefCell::new(HashMap::new()),
                resolved_tensor_axes: RefCell::new(HashMap::new()),
                tensor_strides: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Creates an environment with no parent.
    pub fn root() -> Self {
        Environment::new(None)
    }

    /// Creates an empty environment whose lookups fall back to `parent`.
    pub fn child(parent: &Environment) -> Self {
        Environment::new(Some(parent.clone()))
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.inner.parent.as_ref()
    }

    /// Returns `true` when both handles refer to the same environment.
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of environments in the chain, counting `self`.
    pub fn chain_len(&self) -> usize {
        self.ancestors().count()
    }

    fn ancestors(&self) -> impl Iterator<Item = &Environment> {
        iter::successors(Some(self), |env| env.parent())
    }

    fn chained_search<V>(&self, lookup: impl Fn(&EnvironmentInner) -> Option<V>) -> Option<V> {
        self.ancestors().find_map(|env| lookup(&env.inner))
    }

    /// Looks `key` up in this environment and then in each ancestor.
    pub fn get(&self, key: &str) -> Result<Value> {
        self.chained_search(|inner| inner.values.borrow().get(key).cloned())
            .ok_or_else(|| ScopeError::KeyNotFound {
                namespace: Namespace::Values,
                key: key.to_string(),
            })
    }

    /// Typed variant of [`get`](Self::get).
    ///
    /// The nearest binding decides the outcome: a value of a different type fails with
    /// [`ScopeError::TypeMismatch`] even if an ancestor holds a `T` under the same key.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        self.get(key)?
            .downcast::<T>()
            .map_err(|_| ScopeError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// Chained lookup that yields `default` once the chain is exhausted.
    pub fn get_or_default(&self, key: &str, default: Value) -> Value {
        self.chained_search(|inner| inner.values.borrow().get(key).cloned())
            .unwrap_or(default)
    }

    /// Same as [`get_or_default`](Self::get_or_default), under the graph builders' older name.
    pub fn get_value(&self, key: &str, default: Value) -> Value {
        self.get_or_default(key, default)
    }

    /// Binds `key` in this environment only. Ancestors are never modified.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.values.borrow_mut().insert(key.into(), value);
    }

    /// Same as [`set`](Self::set), under the graph builders' older name.
    pub fn set_value(&self, key: impl Into<String>, value: Value) {
        self.set(key, value);
    }

    /// Wraps `value` and binds it locally.
    pub fn bind<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.set(key, Arc::new(value));
    }

    /// Whether `key` is bound in this environment itself, ignoring ancestors.
    pub fn contains_local(&self, key: &str) -> bool {
        self.inner.values.borrow().contains_key(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ancestors()
            .any(|env| env.inner.values.borrow().contains_key(key))
    }

    pub fn get_cached_resolved_axes(&self, tensor: TensorKey) -> Result<Value> {
        self.chained_search(|inner| inner.resolved_tensor_axes.borrow().get(&tensor).cloned())
            .ok_or_else(|| ScopeError::KeyNotFound {
                namespace: Namespace::ResolvedAxes,
                key: tensor.to_string(),
            })
    }

    pub fn set_cached_resolved_axes(&self, tensor: TensorKey, axes: Value) {
        self.inner
            .resolved_tensor_axes
            .borrow_mut()
            .insert(tensor, axes);
    }

    pub fn get_tensor_strides(&self, tensor: TensorKey) -> Result<Strides> {
        self.chained_search(|inner| inner.tensor_strides.borrow().get(&tensor).cloned())
            .ok_or_else(|| ScopeError::KeyNotFound {
                namespace: Namespace::Strides,
                key: tensor.to_string(),
            })
    }

    pub fn set_tensor_strides(&self, tensor: TensorKey, strides: Strides) {
        self.inner.tensor_strides.borrow_mut().insert(tensor, strides);
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::root()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.inner.values.borrow().keys().cloned().collect();
        keys.sort();
        f.debug_struct("Environment")
            .field("depth", &self.chain_len())
            .field("values", &keys)
            .field(
                "resolved_tensor_axes",
                &self.inner.resolved_tensor_axes.borrow().len(),
            )
            .field("tensor_strides", &self.inner.tensor_strides.borrow().len())
            .finish()
    }
}
