//! EdgeFlow's execution substrate: the node contract and registry, the
//! message/value types flowing between nodes, the hardware abstraction
//! layer, the built-in flow-control node types, and the engine that runs
//! a deployed graph of nodes on a single device.

pub mod cancel;
pub mod engine;
pub mod error;
pub mod globals;
pub mod hal;
pub mod message;
pub mod node;
pub mod ops;
pub mod value;

pub use engine::{Edge, Engine, FlowGraph, NodeSpec};
pub use error::{ErrorKind, ExecutionError, Result};
pub use message::{Message, MessageType, Parts, PartsType};
pub use node::{Category, Config, Executor, ExecutorFactory, NodeInfo, NodeType, PortHandle, REGISTRY};
pub use value::Value;
