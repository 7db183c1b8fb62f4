use std::fmt;

use thiserror::Error;

/// Identifies one of the three per-thread scope stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackKind {
    NameScope,
    Ops,
    Environment,
}

impl StackKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StackKind::NameScope => "name_scope",
            StackKind::Ops => "ops",
            StackKind::Environment => "environment",
        }
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one of the independent mappings held by an [`Environment`](crate::Environment).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Values,
    ResolvedAxes,
    Strides,
}

impl Namespace {
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::Values => "values",
            Namespace::ResolvedAxes => "resolved_tensor_axes",
            Namespace::Strides => "tensor_strides",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by environment lookups and scope stack bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("key `{key}` not found in {namespace} of any enclosing environment")]
    KeyNotFound { namespace: Namespace, key: String },
    #[error("{stack} scope stack lost its sentinel entry (unbalanced push/pop)")]
    EmptyScope { stack: StackKind },
    #[error("{stack} scope guard released out of order: expected depth {expected}, found {found}")]
    OutOfOrderRelease {
        stack: StackKind,
        expected: usize,
        found: usize,
    },
    #[error("no environment is active on this thread")]
    NoActiveEnvironment,
    #[error("value bound to `{key}` is not a `{expected}`")]
    TypeMismatch { key: String, expected: &'static str },
}

pub type Result<T> = std::result::Result<T, ScopeError>;
