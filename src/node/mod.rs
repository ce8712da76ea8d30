//! The node contract & executor interface. The plug-in surface everything
//! else in the crate dispatches through: one polymorphic `Executor` trait,
//! because a flow node's category (input/processing/output/function) is a
//! property of its `NodeInfo`, not a distinct Rust type the engine has to
//! match on.

mod registry;
mod schema;

pub use registry::{NodeRegistry, REGISTRY};
pub use schema::{Category, PortSchema, PropertySchema, PropertyType};

use std::fmt::Debug;

use crossbeam::channel::Receiver;
use indexmap::IndexMap;

use crate::cancel::CancelToken;
use crate::error::{ExecutionError, Result};
use crate::message::Message;
use crate::value::Value;

/// Stable node-type tag, e.g. `"gpio-watch"`, `"switch"`, `"http-in"`.
pub type NodeType = String;

/// A node's input or output port identity within its own `NodeInfo`. Ports
/// are addressed by position ("ordered port schema"); `0` is the
/// default output port every single-output node writes to.
pub type PortHandle = usize;

/// Configuration map passed to `Init`. An `IndexMap` rather
/// than `HashMap` so that "required fields missing" error messages and any
/// round-trip back through a UI preserve the declared property order.
pub type Config = IndexMap<String, Value>;

/// Catalog entry for one node type ("NodeInfo").
#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub node_type: NodeType,
    pub name: String,
    pub category: Category,
    pub description: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub properties: Vec<PropertySchema>,
    pub inputs: Vec<PortSchema>,
    pub outputs: Vec<PortSchema>,
}

impl NodeInfo {
    /// Validates the schema invariants: `type` uniqueness is
    /// the registry's job, but property-name uniqueness and the
    /// default-validates-against-declared-type rule are per-entry.
    pub fn validate_schema(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for prop in &self.properties {
            if !seen.insert(&prop.name) {
                return Err(ExecutionError::ConfigInvalid(format!(
                    "duplicate property name '{}' on node type '{}'",
                    prop.name, self.node_type
                )));
            }
            prop.validate_default()?;
        }
        Ok(())
    }

    /// Checks a config map against required properties. The registry/executor call
    /// this before `Executor::init` so every node gets the same
    /// `required-field-missing` behavior instead of reimplementing it.
    pub fn validate_config(&self, config: &Config) -> Result<()> {
        for prop in &self.properties {
            if prop.required && !config.contains_key(&prop.name) {
                return Err(ExecutionError::RequiredFieldMissing(prop.name.clone()));
            }
        }
        Ok(())
    }
}

/// Execution context passed to every `Execute` call (`ctx`): cancellation
/// only, for now.
#[derive(Clone)]
pub struct ExecContext {
    pub cancel: CancelToken,
}

impl ExecContext {
    pub fn new(cancel: CancelToken) -> Self {
        Self { cancel }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ExecutionError::CtxCancelled)
        } else {
            Ok(())
        }
    }
}

/// Output of `Execute` for a node that may target more than the default
/// port: multi-output nodes (switch, split) encode per-output
/// targeting in metadata readable by the engine.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// One entry per `(port, message)` the engine should deliver. A plain
    /// single-output node always returns exactly one entry for port `0`.
    pub outputs: Vec<(PortHandle, Message)>,
}

impl Dispatch {
    pub fn single(msg: Message) -> Self {
        Self {
            outputs: vec![(0, msg)],
        }
    }

    pub fn to_port(port: PortHandle, msg: Message) -> Self {
        Self {
            outputs: vec![(port, msg)],
        }
    }

    pub fn none() -> Self {
        Self { outputs: Vec::new() }
    }

    pub fn push(&mut self, port: PortHandle, msg: Message) {
        self.outputs.push((port, msg));
    }
}

/// The per-node runtime object. A factory
/// produces one fresh instance per deployed node (`FactoryFor`);
/// the engine owns it for exactly one `Init` → many `Execute` → one
/// `Cleanup` lifecycle.
pub trait Executor: Debug + Send {
    /// Validates required config fields, parses, acquires durable
    /// resources. Called exactly once before any `Execute`. Failure is
    /// terminal for this node.
    fn init(&mut self, config: &Config) -> Result<()>;

    /// Pure request/response unless this is a source node. May suspend on
    /// I/O; must observe `ctx.cancel` and return `ExecutionError::CtxCancelled`
    /// promptly.
    fn execute(&mut self, ctx: &ExecContext, msg: Message) -> Result<Dispatch>;

    /// Releases every resource acquired during `init`/`execute`. Must be
    /// idempotent under concurrent calls.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Source nodes override this to return `true`; such
    /// nodes additionally provide `start`/`output_channel` below.
    fn is_source(&self) -> bool {
        false
    }

    /// Launches this node's background producer. Only meaningful when
    /// [`Executor::is_source`] is `true`; the default panics because a
    /// non-source executor should never be started.
    fn start(&mut self, _ctx: &ExecContext) -> Result<()> {
        unreachable!("start() called on a non-source executor")
    }

    /// The bounded channel the engine drains for a source node's emitted
    /// messages (default depth [`DEFAULT_CHANNEL_DEPTH`]). `None` until
    /// [`Executor::start`] has run.
    fn output_channel(&self) -> Option<Receiver<Message>> {
        None
    }

    /// A channel a processing node can use to emit messages outside the
    /// synchronous request/response shape of `execute` — e.g. `trigger`'s
    /// delayed second message, fired from a timer thread with no incoming
    /// message to respond to. `None` for every node that only ever
    /// returns output through `execute`'s `Dispatch`.
    fn async_outputs(&self) -> Option<Receiver<(PortHandle, Message)>> {
        None
    }
}

/// Default bounded depth for a source node's output channel.
pub const DEFAULT_CHANNEL_DEPTH: usize = 100;

/// Produces a fresh [`Executor`] instance. Must be side-effect-free beyond
/// allocating the executor (`FactoryFor`). Node packages
/// implement this on a small marker struct per node type (see any `ops::*`
/// module for an example) rather than a closure, so that `Debug` output
/// (and the registry's `Debug` impl) names the node type instead of an
/// opaque function pointer.
pub trait ExecutorFactory: Send + Sync + Debug {
    fn create(&self) -> Box<dyn Executor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_config_reports_missing_required_field() {
        let info = NodeInfo {
            node_type: "demo".into(),
            name: "Demo".into(),
            category: Category::Processing,
            description: String::new(),
            icon: None,
            color: None,
            properties: vec![PropertySchema::string("host").required()],
            inputs: vec![],
            outputs: vec![],
        };
        let config = Config::new();
        let err = info.validate_config(&config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RequiredFieldMissing);
    }

    #[test]
    fn validate_schema_rejects_duplicate_property_names() {
        let info = NodeInfo {
            node_type: "demo".into(),
            name: "Demo".into(),
            category: Category::Processing,
            description: String::new(),
            icon: None,
            color: None,
            properties: vec![
                PropertySchema::string("host"),
                PropertySchema::string("host"),
            ],
            inputs: vec![],
            outputs: vec![],
        };
        assert!(info.validate_schema().is_err());
    }
}
