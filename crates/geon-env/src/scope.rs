//! Scoped activation of environments, captured op lists and name scopes.
//!
//! Each `push_*` function places an entry on the calling thread's stack and returns a guard
//! that pops exactly one entry when dropped, so the stack is unwound even if the guarded code
//! returns early with an error or panics. The `with_*` helpers wrap the same guards around a
//! closure:
//!
//! ```rust,ignore
//! with_environment(None, true, |env| {
//!     let env = env.expect("a fresh environment is created");
//!     env.bind("batch_axes", vec!["N"]);
//!     build_nodes()
//! })?;
//! ```

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::thread::{self, LocalKey};

use log::{debug, error, trace};

use crate::environment::{Environment, Value};
use crate::error::{Result, ScopeError};
use crate::settings;
use crate::stack::{self, ScopeStack, ENVIRONMENT_STACK, NAME_SCOPE_STACK, OPS_STACK};

/// Opaque entry of the name-scope stack.
pub type NameScope = std::sync::Arc<str>;

/// Operation list collected while a [`with_captured_ops`] block is active.
#[derive(Clone, Default)]
pub struct CapturedOps {
    ops: Rc<RefCell<Vec<Value>>>,
}

impl CapturedOps {
    pub fn new() -> Self {
        CapturedOps::default()
    }

    pub fn record(&self, op: Value) {
        self.ops.borrow_mut().push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.borrow().is_empty()
    }

    /// Copies the recorded ops, leaving the list intact.
    pub fn snapshot(&self) -> Vec<Value> {
        self.ops.borrow().clone()
    }

    /// Drains the recorded ops.
    pub fn take(&self) -> Vec<Value> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    pub fn ptr_eq(&self, other: &CapturedOps) -> bool {
        Rc::ptr_eq(&self.ops, &other.ops)
    }
}

impl fmt::Debug for CapturedOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturedOps")
            .field("len", &self.len())
            .finish()
    }
}

// Guards pop the stack of the thread that created them and must not leave it.
type NotSend = PhantomData<*const ()>;

fn push_entry<T: Clone>(key: &'static LocalKey<RefCell<ScopeStack<T>>>, entry: Option<T>) -> usize {
    key.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(entry);
        trace!("push {} scope -> depth {}", stack.kind(), stack.depth());
        stack.depth()
    })
}

/// Pops the top entry of `key`'s stack and checks that the releasing guard owned it.
///
/// The entry is popped even when the check fails, so every guard removes exactly one entry.
fn release_entry<T: Clone>(
    key: &'static LocalKey<RefCell<ScopeStack<T>>>,
    expected_depth: usize,
) -> Result<()> {
    // The thread-local may already be gone while the thread is being torn down.
    let Ok(outcome) = key.try_with(|stack| {
        let mut stack = stack.borrow_mut();
        let kind = stack.kind();
        let found = stack.depth();
        stack.pop()?;
        trace!("pop {kind} scope -> depth {}", stack.depth());
        if found != expected_depth {
            return Err(ScopeError::OutOfOrderRelease {
                stack: kind,
                expected: expected_depth,
                found,
            });
        }
        Ok(())
    }) else {
        return Ok(());
    };
    outcome
}

fn pop_entry<T: Clone>(key: &'static LocalKey<RefCell<ScopeStack<T>>>, expected_depth: usize) {
    if let Err(err) = release_entry(key, expected_depth) {
        report_unbalanced(err);
    }
}

/// Logs an unbalanced stack, or panics under `GEON_STRICT_SCOPES` unless already unwinding.
fn report_unbalanced(err: ScopeError) {
    if settings::strict_scopes() && !thread::panicking() {
        panic!("{err}");
    }
    error!("{err}");
}

/// RAII guard that keeps an environment entry on the thread-local stack.
///
/// Created by [`push_environment`] and [`with_environment`].
pub struct EnvironmentGuard {
    environment: Option<Environment>,
    depth: usize,
    _not_send: NotSend,
}

impl EnvironmentGuard {
    /// The entry this guard pushed; `None` when the "no environment" entry was pushed.
    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }
}

impl Drop for EnvironmentGuard {
    fn drop(&mut self) {
        pop_entry(&ENVIRONMENT_STACK, self.depth);
    }
}

/// Pushes an environment for the current thread and returns a guard that restores the
/// previous one on drop.
///
/// With no explicit environment and `create` set, a fresh environment chained to the
/// currently active one is pushed. With neither, the "no environment" entry is pushed,
/// hiding any outer environment until the guard drops.
pub fn push_environment(explicit: Option<Environment>, create: bool) -> Result<EnvironmentGuard> {
    let environment = match explicit {
        Some(environment) => Some(environment),
        None if create => {
            let parent = stack::current_environment()?;
            let environment = Environment::new(parent);
            debug!(
                "created environment with chain length {}",
                environment.chain_len()
            );
            Some(environment)
        }
        None => None,
    };
    let depth = push_entry(&ENVIRONMENT_STACK, environment.clone());
    Ok(EnvironmentGuard {
        environment,
        depth,
        _not_send: PhantomData,
    })
}

/// Runs `f` with an environment installed as the current one.
///
/// `f` receives the active entry (see [`push_environment`] for how it is chosen).
pub fn with_environment<F, R>(explicit: Option<Environment>, create: bool, f: F) -> Result<R>
where
    F: FnOnce(Option<&Environment>) -> R,
{
    let guard = push_environment(explicit, create)?;
    let result = f(guard.environment());
    drop(guard);
    Ok(result)
}

/// Runs `f` inside a fresh child of the current environment.
pub fn with_child_environment<F, R>(f: F) -> Result<R>
where
    F: FnOnce(&Environment) -> R,
{
    let guard = push_environment(None, true)?;
    let environment = guard
        .environment()
        .cloned()
        .ok_or(ScopeError::NoActiveEnvironment)?;
    let result = f(&environment);
    drop(guard);
    Ok(result)
}

/// RAII guard that keeps an op list on the thread-local stack.
pub struct OpsGuard {
    ops: Option<CapturedOps>,
    depth: usize,
    _not_send: NotSend,
}

impl OpsGuard {
    pub fn ops(&self) -> Option<&CapturedOps> {
        self.ops.as_ref()
    }
}

impl Drop for OpsGuard {
    fn drop(&mut self) {
        pop_entry(&OPS_STACK, self.depth);
    }
}

/// Pushes `ops` (possibly `None`) as the current op list.
pub fn push_captured_ops(ops: Option<CapturedOps>) -> OpsGuard {
    let depth = push_entry(&OPS_STACK, ops.clone());
    OpsGuard {
        ops,
        depth,
        _not_send: PhantomData,
    }
}

/// Runs `f` with `ops` installed as the current op list.
pub fn with_captured_ops<F, R>(ops: Option<CapturedOps>, f: F) -> R
where
    F: FnOnce(Option<&CapturedOps>) -> R,
{
    let guard = push_captured_ops(ops);
    let result = f(guard.ops());
    drop(guard);
    result
}

/// Appends `op` to the current op list. Returns `false` when nothing is capturing.
pub fn record_op(op: Value) -> Result<bool> {
    match stack::current_ops()? {
        Some(ops) => {
            ops.record(op);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// RAII guard that keeps a name scope on the thread-local stack.
pub struct NameScopeGuard {
    name: NameScope,
    depth: usize,
    _not_send: NotSend,
}

impl NameScopeGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameScopeGuard {
    fn drop(&mut self) {
        pop_entry(&NAME_SCOPE_STACK, self.depth);
    }
}

pub fn push_name_scope(name: impl Into<NameScope>) -> NameScopeGuard {
    let name = name.into();
    let depth = push_entry(&NAME_SCOPE_STACK, Some(name.clone()));
    NameScopeGuard {
        name,
        depth,
        _not_send: PhantomData,
    }
}

/// Runs `f` with `name` as the innermost name scope.
pub fn with_name_scope<F, R>(name: impl Into<NameScope>, f: F) -> R
where
    F: FnOnce() -> R,
{
    let guard = push_name_scope(name);
    let result = f();
    drop(guard);
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::StackKind;

    #[test]
    fn guards_released_out_of_order_still_restore_depth() {
        let outer = push_name_scope("outer");
        let inner = push_name_scope("inner");
        assert_eq!(stack::depth(StackKind::NameScope), 2);

        drop(outer);
        drop(inner);
        assert_eq!(stack::depth(StackKind::NameScope), 0);
    }

    #[test]
    fn release_reports_the_depth_mismatch() {
        let outer_depth = push_entry(&NAME_SCOPE_STACK, Some(NameScope::from("outer")));
        let inner_depth = push_entry(&NAME_SCOPE_STACK, Some(NameScope::from("inner")));

        assert_eq!(
            release_entry(&NAME_SCOPE_STACK, outer_depth),
            Err(ScopeError::OutOfOrderRelease {
                stack: StackKind::NameScope,
                expected: 1,
                found: 2,
            })
        );
        assert_eq!(
            release_entry(&NAME_SCOPE_STACK, inner_depth),
            Err(ScopeError::OutOfOrderRelease {
                stack: StackKind::NameScope,
                expected: 2,
                found: 1,
            })
        );
        assert_eq!(stack::depth(StackKind::NameScope), 0);
    }

    #[test]
    fn release_in_order_is_clean() {
        let outer_depth = push_entry(&OPS_STACK, None);
        let inner_depth = push_entry(&OPS_STACK, Some(CapturedOps::new()));

        assert_eq!(release_entry(&OPS_STACK, inner_depth), Ok(()));
        assert_eq!(release_entry(&OPS_STACK, outer_depth), Ok(()));
        assert_eq!(stack::depth(StackKind::Ops), 0);
    }

    #[test]
    fn release_past_the_sentinel_reports_empty_scope() {
        assert_eq!(
            release_entry(&ENVIRONMENT_STACK, 1),
            Err(ScopeError::EmptyScope {
                stack: StackKind::Environment
            })
        );
        assert!(stack::current_environment().unwrap().is_none());
    }

    #[test]
    fn forgotten_guard_leaves_its_entry_behind() {
        let outer = push_environment(None, true).unwrap();
        let inner = push_environment(None, true).unwrap();
        std::mem::forget(inner);

        // The outer guard pops the forgotten entry, so its own entry is left on the stack.
        drop(outer);
        assert_eq!(stack::depth(StackKind::Environment), 1);

        assert_eq!(
            release_entry(&ENVIRONMENT_STACK, 1),
            Ok(())
        );
        assert_eq!(stack::depth(StackKind::Environment), 0);
    }

    #[test]
    fn record_op_without_capture_is_a_no_op() {
        assert!(!record_op(Arc::new("matmul")).unwrap());

        let ops = CapturedOps::new();
        with_captured_ops(Some(ops.clone()), |_| {
            assert!(record_op(Arc::new("matmul")).unwrap());
            assert!(record_op(Arc::new("add")).unwrap());
        });
        assert!(!record_op(Arc::new("relu")).unwrap());

        let names: Vec<&str> = ops
            .take()
            .into_iter()
            .map(|op| *op.downcast::<&str>().unwrap())
            .collect();
        assert_eq!(names, vec!["matmul", "add"]);
        assert!(ops.is_empty());
    }

    #[test]
    fn pushing_none_hides_outer_ops() {
        let outer = CapturedOps::new();
        with_captured_ops(Some(outer.clone()), |_| {
            with_captured_ops(None, |active| {
                assert!(active.is_none());
                assert!(stack::current_ops().unwrap().is_none());
            });
            let current = stack::current_ops().unwrap().unwrap();
            assert!(current.ptr_eq(&outer));
        });
    }
}
