//! The flow execution engine: wires a deployed graph of
//! nodes and edges, spawns one thread per node, and forwards messages
//! along edges between them, routing any node that fails to its
//! configured error port.

pub mod channel;

use std::thread;

use crossbeam::channel::{self as cb_channel, Receiver, Select};

use crate::cancel::{CancelSource, CancelToken};
use crate::error::{ExecutionError, Result};
use crate::message::Message;
use crate::node::{Config, Executor, ExecContext, NodeType, PortHandle, DEFAULT_CHANNEL_DEPTH, REGISTRY};

use channel::EdgeSender;

/// One deployed node in a flow: its type, its config, and where to
/// forward execution errors.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: usize,
    pub node_type: NodeType,
    pub config: Config,
    /// Index of the node to forward `Execute` errors to as an error-typed
    /// message, if this node has an error port wired.
    pub error_target: Option<usize>,
}

/// A directed edge from one node's output port to another node's input.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub from: usize,
    pub from_port: PortHandle,
    pub to: usize,
}

#[derive(Debug, Default)]
pub struct FlowGraph {
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            if edge.from >= self.nodes.len() || edge.to >= self.nodes.len() {
                return Err(ExecutionError::InvalidPortHandle(edge.from_port));
            }
        }
        Ok(())
    }
}

/// A running deployment ("Ownership": the engine owns every
/// node's `Init` -> `Execute*` -> `Cleanup` lifecycle).
pub struct Engine {
    cancel: CancelSource,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Engine {
    /// Initializes every node, starts every source, and spawns one
    /// worker thread per node.
    /// Any `Init` failure tears down everything already started before
    /// returning the error.
    pub fn start(graph: FlowGraph) -> Result<Self> {
        graph.validate()?;
        let n = graph.nodes.len();

        let mut raw_senders = Vec::with_capacity(n);
        let mut raw_receivers = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = cb_channel::bounded::<Message>(DEFAULT_CHANNEL_DEPTH);
            raw_senders.push(tx);
            raw_receivers.push(rx);
        }
        let edge_senders: Vec<EdgeSender> = raw_senders.into_iter().map(EdgeSender::new).collect();

        let mut out_edges: Vec<Vec<(PortHandle, usize)>> = vec![Vec::new(); n];
        for edge in &graph.edges {
            out_edges[edge.from].push((edge.from_port, edge.to));
        }

        let cancel_source = CancelSource::new();
        let mut handles = Vec::new();

        for (idx, spec) in graph.nodes.iter().enumerate() {
            let start_result = Self::start_node(
                spec,
                idx,
                cancel_source.token(),
                raw_receivers[idx].clone(),
                out_edges[idx].clone(),
                edge_senders.clone(),
                spec.error_target,
            );
            match start_result {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    let mut source = cancel_source;
                    source.cancel();
                    for h in handles {
                        let _ = h.join();
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            cancel: cancel_source,
            handles,
        })
    }

    fn start_node(
        spec: &NodeSpec,
        node_id: usize,
        cancel: CancelToken,
        input: Receiver<Message>,
        out_edges: Vec<(PortHandle, usize)>,
        senders: Vec<EdgeSender>,
        error_target: Option<usize>,
    ) -> Result<thread::JoinHandle<()>> {
        let mut executor = REGISTRY.factory_for(&spec.node_type)?;
        executor.init(&spec.config)?;
        let ctx = ExecContext::new(cancel);

        let is_source = executor.is_source();
        if is_source {
            executor.start(&ctx)?;
        }
        let output_channel = executor.output_channel();
        let async_channel = executor.async_outputs();

        thread::Builder::new()
            .name(format!("edgeflow-node-{node_id}"))
            .spawn(move || {
                run_node(
                    executor,
                    ctx,
                    input,
                    output_channel,
                    async_channel,
                    out_edges,
                    senders,
                    error_target,
                )
            })
            .map_err(ExecutionError::Io)
    }

    /// Cancels every node's context and joins every worker thread. Each
    /// node observes cancellation promptly because every suspension point
    /// in [`run_node`] is a `Select` that includes the cancellation
    /// receiver.
    pub fn stop(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn dispatch(
    port: PortHandle,
    msg: Message,
    out_edges: &[(PortHandle, usize)],
    senders: &[EdgeSender],
) {
    for (edge_port, to) in out_edges {
        if *edge_port == port {
            senders[*to].send_blocking(msg.clone());
        }
    }
}

fn route_error(err: &ExecutionError, error_target: Option<usize>, senders: &[EdgeSender]) {
    if err.is_cancellation() {
        return;
    }
    log::warn!("node execution failed: {err}");
    let Some(target) = error_target else {
        return;
    };
    let msg = Message::new(crate::value::Value::Str(err.to_string()))
        .with_type(crate::message::MessageType::Error);
    senders[target].send_blocking(msg);
}

/// The per-node worker loop: waits on whichever of
/// {cancellation, inbound edge message, source output, async output}
/// becomes ready first, processes exactly one event, and loops. Runs
/// until cancellation or the inbound edge disconnects.
#[allow(clippy::too_many_arguments)]
fn run_node(
    mut executor: Box<dyn Executor>,
    ctx: ExecContext,
    input: Receiver<Message>,
    output_channel: Option<Receiver<Message>>,
    async_channel: Option<Receiver<(PortHandle, Message)>>,
    out_edges: Vec<(PortHandle, usize)>,
    senders: Vec<EdgeSender>,
    error_target: Option<usize>,
) {
    let cancel_recv = ctx.cancel.cancelled_recv();

    loop {
        let mut sel = Select::new();
        let cancel_idx = sel.recv(&cancel_recv);
        let input_idx = sel.recv(&input);
        let output_idx = output_channel.as_ref().map(|r| sel.recv(r));
        let async_idx = async_channel.as_ref().map(|r| sel.recv(r));

        let oper = sel.select();
        let index = oper.index();

        if index == cancel_idx {
            let _ = oper.recv(&cancel_recv);
            break;
        } else if index == input_idx {
            match oper.recv(&input) {
                Ok(msg) => match executor.execute(&ctx, msg) {
                    Ok(out) => {
                        for (port, msg) in out.outputs {
                            dispatch(port, msg, &out_edges, &senders);
                        }
                    }
                    Err(e) => route_error(&e, error_target, &senders),
                },
                Err(_) => break,
            }
        } else if Some(index) == output_idx {
            match oper.recv(output_channel.as_ref().unwrap()) {
                Ok(msg) => dispatch(0, msg, &out_edges, &senders),
                Err(_) => {
                    // A source whose own production loop has exited
                    // (e.g. a one-shot schedule with no further
                    // occurrences) still needs to keep servicing `input`
                    // and cancellation, so this isn't fatal by itself.
                }
            }
        } else if Some(index) == async_idx {
            if let Ok((port, msg)) = oper.recv(async_channel.as_ref().unwrap()) {
                dispatch(port, msg, &out_edges, &senders);
            }
        }
    }

    let _ = executor.cleanup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Dispatch, NodeInfo};
    use crate::value::Value;
    use once_cell::sync::OnceCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct DoublingExecutor;
    impl Executor for DoublingExecutor {
        fn init(&mut self, _config: &Config) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, _ctx: &ExecContext, msg: Message) -> Result<Dispatch> {
            COUNTER.fetch_add(1, Ordering::SeqCst);
            let doubled = match msg.payload {
                Value::Int(i) => Value::Int(i * 2),
                other => other,
            };
            Ok(Dispatch::single(Message::new(doubled)))
        }
    }

    #[derive(Debug)]
    struct DoublingFactory;
    impl crate::node::ExecutorFactory for DoublingFactory {
        fn create(&self) -> Box<dyn Executor> {
            Box::new(DoublingExecutor)
        }
    }

    fn register_doubling(node_type: &str) {
        let info = NodeInfo {
            node_type: node_type.to_string(),
            name: node_type.to_string(),
            category: crate::node::Category::Processing,
            description: String::new(),
            icon: None,
            color: None,
            properties: vec![],
            inputs: vec![],
            outputs: vec![],
        };
        let _ = REGISTRY.register(info, Arc::new(DoublingFactory));
    }

    /// Emits exactly one message from a background thread, then its
    /// output channel closes — exercises the engine's source-node startup
    /// path (`Executor::start`/`output_channel`).
    #[derive(Debug)]
    struct EmitOnceExecutor {
        receiver: Option<cb_channel::Receiver<Message>>,
    }

    impl Executor for EmitOnceExecutor {
        fn init(&mut self, _config: &Config) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, _ctx: &ExecContext, _msg: Message) -> Result<Dispatch> {
            Ok(Dispatch::none())
        }
        fn is_source(&self) -> bool {
            true
        }
        fn start(&mut self, _ctx: &ExecContext) -> Result<()> {
            let (tx, rx) = cb_channel::bounded(1);
            self.receiver = Some(rx);
            thread::spawn(move || {
                let _ = tx.send(Message::new(Value::Int(4)));
            });
            Ok(())
        }
        fn output_channel(&self) -> Option<cb_channel::Receiver<Message>> {
            self.receiver.clone()
        }
    }

    #[derive(Debug)]
    struct EmitOnceFactory;
    impl crate::node::ExecutorFactory for EmitOnceFactory {
        fn create(&self) -> Box<dyn Executor> {
            Box::new(EmitOnceExecutor { receiver: None })
        }
    }

    /// Forwards every message it receives into a process-wide channel the
    /// test blocks on — stands in for an external sink.
    fn sink_channel() -> &'static (cb_channel::Sender<Message>, cb_channel::Receiver<Message>) {
        static SINK: OnceCell<(cb_channel::Sender<Message>, cb_channel::Receiver<Message>)> =
            OnceCell::new();
        SINK.get_or_init(cb_channel::unbounded)
    }

    #[derive(Debug)]
    struct SinkExecutor;
    impl Executor for SinkExecutor {
        fn init(&mut self, _config: &Config) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, _ctx: &ExecContext, msg: Message) -> Result<Dispatch> {
            let _ = sink_channel().0.send(msg);
            Ok(Dispatch::none())
        }
    }

    #[derive(Debug)]
    struct SinkFactory;
    impl crate::node::ExecutorFactory for SinkFactory {
        fn create(&self) -> Box<dyn Executor> {
            Box::new(SinkExecutor)
        }
    }

    fn register(node_type: &str, factory: Arc<dyn crate::node::ExecutorFactory>) {
        let info = NodeInfo {
            node_type: node_type.to_string(),
            name: node_type.to_string(),
            category: crate::node::Category::Processing,
            description: String::new(),
            icon: None,
            color: None,
            properties: vec![],
            inputs: vec![],
            outputs: vec![],
        };
        let _ = REGISTRY.register(info, factory);
    }

    #[test]
    fn a_message_emitted_by_a_source_reaches_a_downstream_sink_doubled() {
        register("engine-test-emit-once", Arc::new(EmitOnceFactory));
        register_doubling("engine-test-double");
        register("engine-test-sink", Arc::new(SinkFactory));

        let graph = FlowGraph {
            nodes: vec![
                NodeSpec {
                    id: 0,
                    node_type: "engine-test-emit-once".to_string(),
                    config: Config::new(),
                    error_target: None,
                },
                NodeSpec {
                    id: 1,
                    node_type: "engine-test-double".to_string(),
                    config: Config::new(),
                    error_target: None,
                },
                NodeSpec {
                    id: 2,
                    node_type: "engine-test-sink".to_string(),
                    config: Config::new(),
                    error_target: None,
                },
            ],
            edges: vec![
                Edge {
                    from: 0,
                    from_port: 0,
                    to: 1,
                },
                Edge {
                    from: 1,
                    from_port: 0,
                    to: 2,
                },
            ],
        };

        let engine = Engine::start(graph).unwrap();
        let (_, rx) = sink_channel();
        let received = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(received.payload, Value::Int(8));

        engine.stop();
    }

    #[test]
    fn invalid_edge_target_is_rejected_before_any_thread_starts() {
        let graph = FlowGraph {
            nodes: vec![NodeSpec {
                id: 0,
                node_type: "engine-test-double".to_string(),
                config: Config::new(),
                error_target: None,
            }],
            edges: vec![Edge {
                from: 0,
                from_port: 0,
                to: 5,
            }],
        };
        assert!(Engine::start(graph).is_err());
    }

    #[test]
    fn stop_joins_every_worker_thread_promptly() {
        register_doubling("engine-test-double-2");
        let graph = FlowGraph {
            nodes: vec![NodeSpec {
                id: 0,
                node_type: "engine-test-double-2".to_string(),
                config: Config::new(),
                error_target: None,
            }],
            edges: vec![],
        };
        let engine = Engine::start(graph).unwrap();
        let start = std::time::Instant::now();
        engine.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
