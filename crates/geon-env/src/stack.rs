//! Per-thread scope stacks.
//!
//! Each thread lazily gets three independent stacks: name scopes, captured op lists and
//! environments. Every stack starts with a sentinel entry meaning "nothing active", so the
//! current value is always defined. The stacks are never shared between threads, which is
//! the only isolation mechanism in this crate; no locks are involved.

use std::cell::RefCell;

use crate::environment::Environment;
use crate::error::{Result, ScopeError, StackKind};
use crate::scope::{CapturedOps, NameScope};

/// Stack of optional scope entries with a `None` sentinel at the bottom.
#[derive(Debug, Clone)]
pub struct ScopeStack<T> {
    kind: StackKind,
    entries: Vec<Option<T>>,
}

impl<T: Clone> ScopeStack<T> {
    pub fn new(kind: StackKind) -> Self {
        ScopeStack {
            kind,
            entries: vec![None],
        }
    }

    pub fn kind(&self) -> StackKind {
        self.kind
    }

    pub fn push(&mut self, entry: Option<T>) {
        self.entries.push(entry);
    }

    /// Pops the top entry. The sentinel is never removed.
    pub fn pop(&mut self) -> Result<Option<T>> {
        if self.entries.len() <= 1 {
            return Err(ScopeError::EmptyScope { stack: self.kind });
        }
        self.entries
            .pop()
            .ok_or(ScopeError::EmptyScope { stack: self.kind })
    }

    /// Returns the top entry; `Ok(None)` when only the sentinel (or a pushed `None`) is there.
    pub fn current(&self) -> Result<Option<T>> {
        self.entries
            .last()
            .cloned()
            .ok_or(ScopeError::EmptyScope { stack: self.kind })
    }

    /// Number of entries pushed above the sentinel.
    pub fn depth(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }
}

thread_local! {
    pub(crate) static NAME_SCOPE_STACK: RefCell<ScopeStack<NameScope>> =
        RefCell::new(ScopeStack::new(StackKind::NameScope));
    pub(crate) static OPS_STACK: RefCell<ScopeStack<CapturedOps>> =
        RefCell::new(ScopeStack::new(StackKind::Ops));
    pub(crate) static ENVIRONMENT_STACK: RefCell<ScopeStack<Environment>> =
        RefCell::new(ScopeStack::new(StackKind::Environment));
}

/// Environment currently active on the calling thread, if any.
pub fn current_environment() -> Result<Option<Environment>> {
    ENVIRONMENT_STACK.with(|stack| stack.borrow().current())
}

/// Op list currently capturing on the calling thread, if any.
pub fn current_ops() -> Result<Option<CapturedOps>> {
    OPS_STACK.with(|stack| stack.borrow().current())
}

/// Innermost name scope on the calling thread, if any.
pub fn current_name_scope() -> Result<Option<NameScope>> {
    NAME_SCOPE_STACK.with(|stack| stack.borrow().current())
}

/// Number of explicit entries on the calling thread's stack of `kind`.
pub fn depth(kind: StackKind) -> usize {
    match kind {
        StackKind::NameScope => NAME_SCOPE_STACK.with(|stack| stack.borrow().depth()),
        StackKind::Ops => OPS_STACK.with(|stack| stack.borrow().depth()),
        StackKind::Environment => ENVIRONMENT_STACK.with(|stack| stack.borrow().depth()),
    }
}
