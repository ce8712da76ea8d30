//! The process-wide node-type catalog. Reads vastly outnumber writes and
//! writes only ever happen during process startup, so the table is a
//! `parking_lot::RwLock` rather than a full actor/mutex-serialized design.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::error::{ExecutionError, Result};
use crate::node::{ExecutorFactory, NodeInfo, NodeType};

struct Entry {
    info: NodeInfo,
    factory: Arc<dyn ExecutorFactory>,
}

/// A process-wide catalog mapping node-type tag to [`NodeInfo`] and a
/// factory producing fresh [`crate::node::Executor`] instances.
#[derive(Default)]
pub struct NodeRegistry {
    entries: RwLock<HashMap<NodeType, Entry>>,
    // Registration order, for the deterministic `enumerate()` snapshot
    // ("returns entries in registration order").
    order: RwLock<Vec<NodeType>>,
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("len", &self.entries.read().len())
            .finish()
    }
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called from module init. Rejects a duplicate `type`
    /// with `duplicate-type`; never silently overwrites an existing entry.
    pub fn register(
        &self,
        info: NodeInfo,
        factory: Arc<dyn ExecutorFactory>,
    ) -> Result<()> {
        info.validate_schema()?;
        let mut entries = self.entries.write();
        if entries.contains_key(&info.node_type) {
            return Err(ExecutionError::DuplicateType(info.node_type));
        }
        let node_type = info.node_type.clone();
        entries.insert(node_type.clone(), Entry { info, factory });
        drop(entries);
        self.order.write().push(node_type);
        Ok(())
    }

    pub fn get(&self, node_type: &str) -> Result<NodeInfo> {
        self.entries
            .read()
            .get(node_type)
            .map(|e| e.info.clone())
            .ok_or_else(|| ExecutionError::NotFound(node_type.to_string()))
    }

    /// Deterministic snapshot in registration order.
    pub fn enumerate(&self) -> Vec<NodeInfo> {
        let order = self.order.read();
        let entries = self.entries.read();
        order
            .iter()
            .filter_map(|t| entries.get(t).map(|e| e.info.clone()))
            .collect()
    }

    /// Fresh instance per call (`FactoryFor`).
    pub fn factory_for(&self, node_type: &str) -> Result<Box<dyn crate::node::Executor>> {
        self.entries
            .read()
            .get(node_type)
            .map(|e| e.factory.create())
            .ok_or_else(|| ExecutionError::NotFound(node_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide registry instance. Unlike the HAL singleton, the registry has no "uninitialized" state to
/// fail on — an empty registry is a perfectly valid (if useless) one, and
/// registrations are expected to accumulate via `register()` calls from
/// each node package's module-init code.
pub static REGISTRY: Lazy<NodeRegistry> = Lazy::new(NodeRegistry::new);
