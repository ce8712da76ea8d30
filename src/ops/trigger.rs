//! The `trigger` node: fires an immediate message, then
//! optionally a second message after a delay, with configurable behavior
//! for what happens if another message arrives while the timer is
//! pending.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::cancel::CancelSource;
use crate::error::Result;
use crate::message::Message;
use crate::node::{
    Category, Config, Dispatch, ExecContext, Executor, ExecutorFactory, NodeInfo, PortHandle,
    PortSchema, PropertySchema,
};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecondAction {
    SendSecondPayload,
    SendNothing,
}

#[derive(Debug, Clone)]
enum PayloadSpec {
    Fixed(Value),
    SameAsInput,
    Null,
}

impl PayloadSpec {
    fn resolve(&self, input: &Value) -> Value {
        match self {
            PayloadSpec::Fixed(v) => v.clone(),
            PayloadSpec::SameAsInput => input.clone(),
            PayloadSpec::Null => Value::Null,
        }
    }

    fn parse(v: Option<&Value>) -> Self {
        match v {
            Some(Value::Str(s)) if s == "__same__" => PayloadSpec::SameAsInput,
            Some(Value::Null) | None => PayloadSpec::Null,
            Some(other) => PayloadSpec::Fixed(other.clone()),
        }
    }
}

#[derive(Debug)]
struct PendingTimer {
    cancel: CancelSource,
}

#[derive(Debug)]
pub struct Trigger {
    first_payload: PayloadSpec,
    second_payload: PayloadSpec,
    second_action: SecondAction,
    duration: Duration,
    extend_on_retrigger: bool,
    pending: Arc<Mutex<Option<PendingTimer>>>,
    sender: Sender<(PortHandle, Message)>,
    receiver: Receiver<(PortHandle, Message)>,
}

impl Trigger {
    fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            first_payload: PayloadSpec::SameAsInput,
            second_payload: PayloadSpec::Null,
            second_action: SecondAction::SendSecondPayload,
            duration: Duration::from_millis(250),
            extend_on_retrigger: false,
            pending: Arc::new(Mutex::new(None)),
            sender,
            receiver,
        }
    }

    /// Arms (or refreshes) the pending timer; returns whether a timer was
    /// already pending when this call started, so `execute` can tell a
    /// fresh trigger from a retrigger landing mid-wait.
    fn arm_timer(&self, topic: Option<String>, input: Value) -> bool {
        let mut pending = self.pending.lock();
        let already_pending = pending.is_some();
        if let Some(existing) = pending.as_mut() {
            if self.extend_on_retrigger {
                // Undisturbed-vs-extend: cancel the running timer and
                // start a fresh one of full duration (// "extend ... restarts the wait from the new trigger").
                existing.cancel.cancel();
            } else {
                // Leave the existing timer running untouched; this
                // trigger is swallowed ("undisturbed").
                return already_pending;
            }
        }

        let source = CancelSource::new();
        let stop = source.token();
        *pending = Some(PendingTimer { cancel: source });
        drop(pending);

        // Only the thread whose wait elapses naturally clears `pending`: a
        // cancelled wait means `arm_timer` already overwrote the slot with
        // a fresh timer, and clearing it here would erase that newer
        // timer's bookkeeping out from under it.
        if self.second_action == SecondAction::SendNothing {
            let pending_ref = self.pending.clone();
            let duration = self.duration;
            thread::Builder::new()
                .name("trigger-timer".into())
                .spawn(move || {
                    if !stop.wait_timeout(duration) {
                        *pending_ref.lock() = None;
                    }
                })
                .expect("failed to spawn trigger timer thread");
            return already_pending;
        }

        let pending_ref = self.pending.clone();
        let duration = self.duration;
        let payload_spec = self.second_payload.clone();
        let sender = self.sender.clone();
        thread::Builder::new()
            .name("trigger-timer".into())
            .spawn(move || {
                if !stop.wait_timeout(duration) {
                    let payload = payload_spec.resolve(&input);
                    let mut msg = Message::new(payload);
                    msg.topic = topic;
                    let _ = sender.send((0, msg));
                    *pending_ref.lock() = None;
                }
            })
            .expect("failed to spawn trigger timer thread");
        already_pending
    }
}

impl Executor for Trigger {
    fn init(&mut self, config: &Config) -> Result<()> {
        self.first_payload = PayloadSpec::parse(config.get("first_payload"));
        self.second_payload = PayloadSpec::parse(config.get("second_payload"));
        self.second_action = match config.get("second_action") {
            Some(Value::Str(s)) if s == "nothing" => SecondAction::SendNothing,
            _ => SecondAction::SendSecondPayload,
        };
        if let Some(ms) = config.get("duration_ms").and_then(Value::as_f64) {
            self.duration = Duration::from_millis(ms.max(0.0) as u64);
        }
        self.extend_on_retrigger = matches!(config.get("extend"), Some(Value::Bool(true)));
        Ok(())
    }

    fn execute(&mut self, _ctx: &ExecContext, msg: Message) -> Result<Dispatch> {
        let topic = msg.topic.clone();
        let first = self.first_payload.resolve(&msg.payload);

        let already_pending = self.arm_timer(msg.topic, msg.payload);

        // Debounce ("send-then-nothing"): while a timer from an earlier
        // arrival is still pending, a retrigger must not emit another
        // first-message — only the burst's opener does.
        if self.second_action == SecondAction::SendNothing && already_pending {
            return Ok(Dispatch::none());
        }

        let mut out = Message::new(first);
        out.topic = topic;
        Ok(Dispatch::single(out))
    }

    /// Cancels whatever timer is pending, idempotently — a second
    /// `Cleanup` call finds `pending` already empty and does nothing
    /// ("idempotent Cleanup").
    fn cleanup(&mut self) -> Result<()> {
        if let Some(mut timer) = self.pending.lock().take() {
            timer.cancel.cancel();
        }
        Ok(())
    }

    fn async_outputs(&self) -> Option<Receiver<(PortHandle, Message)>> {
        Some(self.receiver.clone())
    }
}

pub fn node_info() -> NodeInfo {
    NodeInfo {
        node_type: "trigger".to_string(),
        name: "Trigger".to_string(),
        category: Category::Function,
        description: "Sends a message immediately, then optionally a second one after a delay."
            .to_string(),
        icon: None,
        color: None,
        properties: vec![
            PropertySchema::number("duration_ms").with_default(Value::Int(250)),
            PropertySchema::boolean("extend").with_default(Value::Bool(false)),
            PropertySchema::select(
                "second_action",
                vec![Value::from("send"), Value::from("nothing")],
            )
            .with_default(Value::from("send")),
        ],
        inputs: vec![PortSchema::new("in")],
        outputs: vec![PortSchema::new("out")],
    }
}

#[derive(Debug)]
pub struct TriggerFactory;

impl ExecutorFactory for TriggerFactory {
    fn create(&self) -> Box<dyn Executor> {
        Box::new(Trigger::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource as Cs;
    use std::time::Instant;

    fn ctx() -> ExecContext {
        ExecContext::new(Cs::new().token())
    }

    #[test]
    fn first_message_is_emitted_synchronously() {
        let mut node = Trigger::new();
        let mut config = Config::new();
        config.insert("duration_ms".to_string(), Value::Int(20));
        node.init(&config).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Int(7))).unwrap();
        assert_eq!(dispatch.outputs[0].1.payload, Value::Int(7));
        node.cleanup().unwrap();
    }

    #[test]
    fn second_message_arrives_on_the_async_channel_after_the_duration() {
        let mut node = Trigger::new();
        let mut config = Config::new();
        config.insert("duration_ms".to_string(), Value::Int(20));
        config.insert("second_payload".to_string(), Value::from("done"));
        node.init(&config).unwrap();
        let receiver = node.async_outputs().unwrap();
        node.execute(&ctx(), Message::new(Value::Int(1))).unwrap();
        let (_, msg) = receiver.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(msg.payload, Value::from("done"));
    }

    #[test]
    fn send_nothing_mode_suppresses_the_second_message() {
        let mut node = Trigger::new();
        let mut config = Config::new();
        config.insert("duration_ms".to_string(), Value::Int(10));
        config.insert("second_action".to_string(), Value::from("nothing"));
        node.init(&config).unwrap();
        let receiver = node.async_outputs().unwrap();
        node.execute(&ctx(), Message::new(Value::Int(1))).unwrap();
        assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn undisturbed_mode_ignores_a_retrigger_during_the_wait() {
        let mut node = Trigger::new();
        let mut config = Config::new();
        config.insert("duration_ms".to_string(), Value::Int(150));
        config.insert("second_payload".to_string(), Value::from("first"));
        node.init(&config).unwrap();
        let receiver = node.async_outputs().unwrap();
        let c = ctx();
        node.execute(&c, Message::new(Value::Int(1))).unwrap();
        thread::sleep(Duration::from_millis(50));
        node.execute(&c, Message::new(Value::Int(2))).unwrap();
        let (_, msg) = receiver.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(msg.payload, Value::from("first"));
    }

    #[test]
    fn extend_mode_restarts_the_wait_on_retrigger() {
        let mut node = Trigger::new();
        let mut config = Config::new();
        config.insert("duration_ms".to_string(), Value::Int(100));
        config.insert("extend".to_string(), Value::Bool(true));
        config.insert("second_payload".to_string(), Value::from("second"));
        node.init(&config).unwrap();
        let receiver = node.async_outputs().unwrap();
        let c = ctx();
        let start = Instant::now();
        node.execute(&c, Message::new(Value::Int(1))).unwrap();
        thread::sleep(Duration::from_millis(60));
        node.execute(&c, Message::new(Value::Int(2))).unwrap();
        let (_, msg) = receiver.recv_timeout(Duration::from_millis(500)).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(msg.payload, Value::from("second"));
    }

    #[test]
    fn send_nothing_mode_debounces_a_burst_into_a_single_first_message() {
        let mut node = Trigger::new();
        let mut config = Config::new();
        config.insert("duration_ms".to_string(), Value::Int(150));
        config.insert("second_action".to_string(), Value::from("nothing"));
        node.init(&config).unwrap();
        let c = ctx();

        let first = node.execute(&c, Message::new(Value::Int(1))).unwrap();
        assert_eq!(first.outputs.len(), 1);

        thread::sleep(Duration::from_millis(20));
        let second = node.execute(&c, Message::new(Value::Int(2))).unwrap();
        assert!(second.outputs.is_empty());

        thread::sleep(Duration::from_millis(20));
        let third = node.execute(&c, Message::new(Value::Int(3))).unwrap();
        assert!(third.outputs.is_empty());

        node.cleanup().unwrap();
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut node = Trigger::new();
        node.init(&Config::new()).unwrap();
        node.execute(&ctx(), Message::new(Value::Int(1))).unwrap();
        node.cleanup().unwrap();
        node.cleanup().unwrap();
    }
}
