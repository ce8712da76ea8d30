//! The `schedule` source node: emits a message on a
//! seconds-resolution cron schedule, in an optional named timezone.

use std::str::FromStr;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use crossbeam::channel::{self, Receiver, Sender};

use crate::cancel::CancelToken;
use crate::error::{ExecutionError, Result};
use crate::message::Message;
use crate::node::{
    Category, Config, Dispatch, ExecContext, Executor, ExecutorFactory, NodeInfo, PortSchema,
    PropertySchema, DEFAULT_CHANNEL_DEPTH,
};
use crate::value::Value;

#[derive(Debug)]
pub struct ScheduleSource {
    expr: String,
    timezone: Tz,
    topic: Option<String>,
    payload: Value,
    schedule: Option<Schedule>,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
}

impl ScheduleSource {
    fn new() -> Self {
        let (sender, receiver) = channel::bounded(DEFAULT_CHANNEL_DEPTH);
        Self {
            expr: "0 * * * * *".to_string(),
            timezone: Tz::UTC,
            topic: None,
            payload: Value::Bool(true),
            schedule: None,
            sender,
            receiver,
        }
    }

    fn emit(&self, scheduled: bool) {
        let mut map = indexmap::IndexMap::new();
        map.insert("payload".to_string(), self.payload.clone());
        map.insert("scheduled".to_string(), Value::Bool(scheduled));
        map.insert(
            "timestamp".to_string(),
            Value::Int(Utc::now().timestamp_millis()),
        );
        let mut msg = Message::new(Value::Object(map));
        msg.topic = self.topic.clone();
        let _ = self.sender.try_send(msg);
    }
}

impl Executor for ScheduleSource {
    fn init(&mut self, config: &Config) -> Result<()> {
        if let Some(Value::Str(expr)) = config.get("cron") {
            self.expr = expr.clone();
        }
        if let Some(Value::Str(tz)) = config.get("timezone") {
            self.timezone = Tz::from_str(tz)
                .map_err(|_| ExecutionError::ConfigInvalid(format!("unknown timezone '{tz}'")))?;
        }
        if let Some(Value::Str(topic)) = config.get("topic") {
            self.topic = Some(topic.clone());
        }
        if let Some(payload) = config.get("payload") {
            self.payload = payload.clone();
        }
        self.schedule = Some(
            Schedule::from_str(&self.expr)
                .map_err(|e| ExecutionError::ConfigInvalid(format!("invalid cron expression: {e}")))?,
        );
        Ok(())
    }

    /// Not the node's real job (this is a source), but a manual `Execute`
    /// still emits one message immediately so a flow can trigger the
    /// schedule's downstream path on demand.
    fn execute(&mut self, _ctx: &ExecContext, _msg: Message) -> Result<Dispatch> {
        self.emit(false);
        Ok(Dispatch::none())
    }

    fn is_source(&self) -> bool {
        true
    }

    fn start(&mut self, ctx: &ExecContext) -> Result<()> {
        let schedule = self.schedule.clone().ok_or(ExecutionError::NotInitialized(
            "schedule not initialized".to_string(),
        ))?;
        let sender = self.sender.clone();
        let topic = self.topic.clone();
        let payload = self.payload.clone();
        let timezone = self.timezone;
        let cancel: CancelToken = ctx.cancel.clone();

        thread::Builder::new()
            .name("schedule-source".into())
            .spawn(move || {
                loop {
                    let now = Utc::now().with_timezone(&timezone);
                    let Some(next) = schedule.after(&now).next() else {
                        return;
                    };
                    let wait = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                    if cancel.wait_timeout(wait) {
                        return;
                    }
                    let mut map = indexmap::IndexMap::new();
                    map.insert("payload".to_string(), payload.clone());
                    map.insert("scheduled".to_string(), Value::Bool(true));
                    map.insert(
                        "timestamp".to_string(),
                        Value::Int(Utc::now().timestamp_millis()),
                    );
                    let mut msg = Message::new(Value::Object(map));
                    msg.topic = topic.clone();
                    // Drop-newest under backpressure: a missed tick is
                    // better than stalling the cron timer.
                    match sender.try_send(msg) {
                        Ok(()) | Err(channel::TrySendError::Full(_)) => {}
                        Err(channel::TrySendError::Disconnected(_)) => return,
                    }
                }
            })
            .map_err(ExecutionError::Io)?;
        Ok(())
    }

    fn output_channel(&self) -> Option<Receiver<Message>> {
        Some(self.receiver.clone())
    }

    /// Dropping the sender closes the channel the engine is draining,
    /// which is enough to unblock it; the timer thread itself exits on
    /// the next wake because it observes `ctx.cancel`.
    fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

pub fn node_info() -> NodeInfo {
    NodeInfo {
        node_type: "schedule".to_string(),
        name: "Schedule".to_string(),
        category: Category::Input,
        description: "Emits a message on a seconds-resolution cron schedule.".to_string(),
        icon: None,
        color: None,
        properties: vec![
            PropertySchema::string("cron").required().with_default(Value::from("0 * * * * *")),
            PropertySchema::string("timezone").with_default(Value::from("UTC")),
            PropertySchema::string("topic"),
        ],
        inputs: vec![PortSchema::new("in")],
        outputs: vec![PortSchema::new("out")],
    }
}

#[derive(Debug)]
pub struct ScheduleFactory;

impl ExecutorFactory for ScheduleFactory {
    fn create(&self) -> Box<dyn Executor> {
        Box::new(ScheduleSource::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use std::time::Duration as StdDuration;

    fn ctx() -> (ExecContext, CancelSource) {
        let source = CancelSource::new();
        (ExecContext::new(source.token()), source)
    }

    #[test]
    fn invalid_cron_expression_is_config_invalid() {
        let mut node = ScheduleSource::new();
        let mut config = Config::new();
        config.insert("cron".to_string(), Value::from("not a cron expression"));
        let err = node.init(&config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn unknown_timezone_is_config_invalid() {
        let mut node = ScheduleSource::new();
        let mut config = Config::new();
        config.insert("timezone".to_string(), Value::from("Not/A_Zone"));
        let err = node.init(&config).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn manual_execute_emits_a_non_scheduled_message() {
        let mut node = ScheduleSource::new();
        node.init(&Config::new()).unwrap();
        let (c, _source) = ctx();
        node.execute(&c, Message::new(Value::Null)).unwrap();
        let msg = node.receiver.recv_timeout(StdDuration::from_millis(100)).unwrap();
        assert_eq!(
            msg.payload.get_path("scheduled"),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn every_second_schedule_emits_within_a_couple_seconds() {
        let mut node = ScheduleSource::new();
        let mut config = Config::new();
        config.insert("cron".to_string(), Value::from("* * * * * *"));
        node.init(&config).unwrap();
        let (c, _source) = ctx();
        node.start(&c).unwrap();
        let msg = node
            .output_channel()
            .unwrap()
            .recv_timeout(StdDuration::from_secs(3))
            .unwrap();
        assert_eq!(msg.payload.get_path("scheduled"), Some(&Value::Bool(true)));
    }

    #[test]
    fn cancelling_the_context_stops_the_timer_thread() {
        let mut node = ScheduleSource::new();
        let mut config = Config::new();
        config.insert("cron".to_string(), Value::from("* * * * * *"));
        node.init(&config).unwrap();
        let (c, mut source) = ctx();
        node.start(&c).unwrap();
        source.cancel();
        // Draining whatever raced in before cancellation took effect,
        // then confirming the channel goes quiet, is enough to show the
        // thread stopped rather than continuing to fire.
        thread::sleep(StdDuration::from_millis(1100));
        while node
            .output_channel()
            .unwrap()
            .recv_timeout(StdDuration::from_millis(50))
            .is_ok()
        {}
        assert!(node
            .output_channel()
            .unwrap()
            .recv_timeout(StdDuration::from_millis(1100))
            .is_err());
    }
}
