//! Read-through access to whatever environment is active on the calling thread.

use std::any::Any;
use std::sync::Arc;

use crate::environment::{Environment, Value};
use crate::error::{Result, ScopeError};
use crate::stack;

/// Key under which graph construction keeps the active batch axes.
pub const BATCH_AXES: &str = "batch_axes";

fn active() -> Result<Environment> {
    stack::current_environment()?.ok_or(ScopeError::NoActiveEnvironment)
}

/// Stand-in for "the current environment" that resolves the active environment on every
/// access rather than when the proxy is created, so it stays valid across scope changes.
///
/// Writes go through [`Environment::set`] on the environment itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentEnvironment;

impl CurrentEnvironment {
    pub fn get(&self, key: &str) -> Result<Value> {
        active()?.get(key)
    }

    pub fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        active()?.get_as(key)
    }

    pub fn get_or_default(&self, key: &str, default: Value) -> Result<Value> {
        Ok(active()?.get_or_default(key, default))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(active()?.contains(key))
    }

    /// Resolves the active environment itself.
    pub fn resolve(&self) -> Result<Environment> {
        active()
    }
}

pub fn batch_axes() -> Result<Value> {
    CurrentEnvironment.get(BATCH_AXES)
}

pub fn batch_axes_as<T: Any + Send + Sync>() -> Result<Arc<T>> {
    CurrentEnvironment.get_as(BATCH_AXES)
}

/// Binds the batch axes in the active environment (shadowing any outer binding).
pub fn set_batch_axes(axes: Value) -> Result<()> {
    active()?.set(BATCH_AXES, axes);
    Ok(())
}
