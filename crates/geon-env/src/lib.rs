//! Scoped, thread-local context for graph construction.
//!
//! Graph builders bracket regions of code with [`with_environment`] or
//! [`with_captured_ops`]; inside, nested code reads bindings through chained lookup on the
//! active [`Environment`] (or through [`CurrentEnvironment`]). Every thread owns its own
//! stacks, and every push is paired with exactly one pop by a drop guard.

pub mod environment;
pub mod error;
pub mod proxy;
pub mod scope;
mod settings;
pub mod stack;

pub use environment::{Environment, Strides, TensorKey, Value};
pub use error::{Namespace, Result, ScopeError, StackKind};
pub use proxy::{batch_axes, batch_axes_as, set_batch_axes, CurrentEnvironment, BATCH_AXES};
pub use scope::{
    push_captured_ops, push_environment, push_name_scope, record_op, with_captured_ops,
    with_child_environment, with_environment, with_name_scope, CapturedOps, EnvironmentGuard,
    NameScope, NameScopeGuard, OpsGuard,
};
pub use stack::{current_environment, current_name_scope, current_ops, ScopeStack};
