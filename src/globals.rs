//! A process-wide key/value store ("global" scope), for node types whose
//! config resolves a property against something other than the arriving
//! message — mirrors [`crate::hal`]'s "one process-wide slot behind a
//! lock" pattern rather than threading shared state through every
//! `ExecContext`.

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;

use crate::value::Value;

static GLOBALS: OnceCell<RwLock<IndexMap<String, Value>>> = OnceCell::new();

fn slot() -> &'static RwLock<IndexMap<String, Value>> {
    GLOBALS.get_or_init(|| RwLock::new(IndexMap::new()))
}

/// Reads a global variable by name, or `None` if it was never set.
pub fn get(key: &str) -> Option<Value> {
    slot().read().get(key).cloned()
}

/// Sets (or overwrites) a global variable.
pub fn set(key: impl Into<String>, value: Value) {
    slot().write().insert(key.into(), value);
}

/// Clears every global variable; for tests that need a clean slate on a
/// shared process-wide store.
pub fn clear() {
    slot().write().clear();
}
