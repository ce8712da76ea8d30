//! The `join` node: accumulates the siblings of a `split`
//! (or any messages sharing a `Parts` id) and re-emits one combined
//! message once the group is complete, or on timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::error::Result;
use crate::message::{Message, MessageType, Parts, PartsType};
use crate::node::{
    Category, Config, Dispatch, ExecContext, Executor, ExecutorFactory, NodeInfo, PortSchema,
    PropertySchema,
};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinMode {
    Auto,
    Manual,
    Reduce,
    Merge,
}

/// `build`/`joiner` output shape for `auto`/`manual` groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    Auto,
    Array,
    Object,
    String,
    Buffer,
}

struct Group {
    messages: Vec<(usize, Message)>,
    keys: Vec<Option<String>>,
    expected: usize,
    kind: Option<PartsType>,
    first_seen: Instant,
    last_seen: Instant,
}

/// Running accumulator for `reduce`/`merge` modes: each arriving payload
/// is mapping-merged into `value` rather than buffered whole.
struct MergeAcc {
    value: Value,
    received: usize,
    expected: usize,
    topic: Option<String>,
    msg_type: MessageType,
    last_seen: Instant,
}

#[derive(Debug)]
pub struct Join {
    mode: JoinMode,
    build: BuildMode,
    joiner: String,
    timeout: Option<Duration>,
    manual_count: usize,
    groups: HashMap<Uuid, Group>,
    manual_buffer: Vec<Message>,
    reduce_groups: HashMap<Uuid, MergeAcc>,
    merge_groups: HashMap<Uuid, MergeAcc>,
    merge_anon: Option<MergeAcc>,
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("have", &self.messages.len())
            .field("expected", &self.expected)
            .finish()
    }
}

impl std::fmt::Debug for MergeAcc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeAcc")
            .field("received", &self.received)
            .field("expected", &self.expected)
            .finish()
    }
}

impl Join {
    fn new() -> Self {
        Self {
            mode: JoinMode::Auto,
            build: BuildMode::Auto,
            joiner: "\n".to_string(),
            timeout: None,
            manual_count: 0,
            groups: HashMap::new(),
            manual_buffer: Vec::new(),
            reduce_groups: HashMap::new(),
            merge_groups: HashMap::new(),
            merge_anon: None,
        }
    }

    /// Drops groups whose `last_seen` is older than `timeout`, partially
    /// emitting whatever arrived before the deadline rather than
    /// discarding it outright ("Timeout eviction").
    fn sweep_expired(&mut self) -> Vec<Message> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };
        let mut emitted = Vec::new();

        let expired: Vec<Uuid> = self
            .groups
            .iter()
            .filter(|(_, g)| g.last_seen.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(group) = self.groups.remove(&id) {
                if let Some(msg) = assemble_build(group, self.build, &self.joiner) {
                    emitted.push(msg);
                }
            }
        }

        let expired: Vec<Uuid> = self
            .reduce_groups
            .iter()
            .filter(|(_, g)| g.last_seen.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(acc) = self.reduce_groups.remove(&id) {
                emitted.push(acc.into_message());
            }
        }

        let expired: Vec<Uuid> = self
            .merge_groups
            .iter()
            .filter(|(_, g)| g.last_seen.elapsed() >= timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(acc) = self.merge_groups.remove(&id) {
                emitted.push(acc.into_message());
            }
        }

        if self
            .merge_anon
            .as_ref()
            .is_some_and(|a| a.last_seen.elapsed() >= timeout)
        {
            if let Some(acc) = self.merge_anon.take() {
                emitted.push(acc.into_message());
            }
        }

        emitted
    }
}

impl MergeAcc {
    fn into_message(self) -> Message {
        Message {
            payload: self.value,
            topic: self.topic,
            msg_type: self.msg_type,
            parts: None,
        }
    }
}

/// Merges `incoming` into `base` key by key, recursing into nested
/// mappings and letting `incoming` win on every other conflict
/// ("mapping-merge").
fn mapping_merge(mut base: Value, incoming: Value) -> Value {
    if let (Value::Object(base_map), Value::Object(incoming_map)) = (&mut base, &incoming) {
        for (k, v) in incoming_map {
            match base_map.get_mut(k) {
                Some(slot) => {
                    let prior = std::mem::replace(slot, Value::Null);
                    *slot = mapping_merge(prior, v.clone());
                }
                None => {
                    base_map.insert(k.clone(), v.clone());
                }
            }
        }
        base
    } else {
        incoming
    }
}

/// Reassembles a completed (or timed-out) group into a single message,
/// reordering by sibling `index` and restoring object keys where present
/// ("index-ascending reordering"). `build` picks the output shape;
/// `Auto` infers it from the captured split kind, falling back to
/// object-if-keyed, array otherwise.
fn assemble_build(mut group: Group, build: BuildMode, joiner: &str) -> Option<Message> {
    if group.messages.is_empty() {
        return None;
    }
    group.messages.sort_by_key(|(idx, _)| *idx);
    let has_keys = group.keys.iter().any(Option::is_some);
    let topic = group.messages[0].1.topic.clone();
    let msg_type = group.messages[0].1.msg_type;

    let effective = match build {
        BuildMode::Auto => match group.kind {
            Some(PartsType::Object) => BuildMode::Object,
            Some(PartsType::String) => BuildMode::String,
            Some(PartsType::Buffer) => BuildMode::Buffer,
            _ if has_keys => BuildMode::Object,
            _ => BuildMode::Array,
        },
        other => other,
    };

    let payload = match effective {
        BuildMode::Object => {
            let mut map = IndexMap::new();
            for (idx, msg) in &group.messages {
                let key = group
                    .keys
                    .get(*idx)
                    .and_then(|k| k.clone())
                    .unwrap_or_else(|| idx.to_string());
                map.insert(key, msg.payload.clone());
            }
            Value::Object(map)
        }
        BuildMode::String => {
            let joined = group
                .messages
                .iter()
                .map(|(_, m)| m.payload.stringify())
                .collect::<Vec<_>>()
                .join(joiner);
            Value::Str(joined)
        }
        BuildMode::Buffer => {
            let mut bytes = Vec::new();
            for (_, msg) in &group.messages {
                match &msg.payload {
                    Value::Bytes(b) => bytes.extend_from_slice(b),
                    other => bytes.extend_from_slice(other.stringify().as_bytes()),
                }
            }
            Value::Bytes(bytes)
        }
        BuildMode::Array | BuildMode::Auto => {
            Value::Array(group.messages.into_iter().map(|(_, m)| m.payload).collect())
        }
    };

    Some(Message {
        payload,
        topic,
        msg_type,
        parts: None,
    })
}

impl Executor for Join {
    fn init(&mut self, config: &Config) -> Result<()> {
        if let Some(Value::Str(mode)) = config.get("mode") {
            self.mode = match mode.as_str() {
                "manual" => JoinMode::Manual,
                "reduce" => JoinMode::Reduce,
                "merge" => JoinMode::Merge,
                _ => JoinMode::Auto,
            };
        }
        if let Some(Value::Str(build)) = config.get("build") {
            self.build = match build.as_str() {
                "array" => BuildMode::Array,
                "object" => BuildMode::Object,
                "string" => BuildMode::String,
                "buffer" => BuildMode::Buffer,
                _ => BuildMode::Auto,
            };
        }
        if let Some(Value::Str(joiner)) = config.get("joiner") {
            self.joiner = joiner.clone();
        }
        if let Some(secs) = config.get("timeout_secs").and_then(Value::as_f64) {
            if secs > 0.0 {
                self.timeout = Some(Duration::from_secs_f64(secs));
            }
        }
        if let Some(n) = config.get("count").and_then(Value::as_f64) {
            self.manual_count = n as usize;
        }
        Ok(())
    }

    fn execute(&mut self, _ctx: &ExecContext, msg: Message) -> Result<Dispatch> {
        let mut dispatch = Dispatch::default();
        for expired in self.sweep_expired() {
            dispatch.push(0, expired.strip_parts());
        }

        match self.mode {
            JoinMode::Manual => {
                self.manual_buffer.push(msg);
                if self.manual_count > 0 && self.manual_buffer.len() >= self.manual_count {
                    let taken: Vec<Message> = std::mem::take(&mut self.manual_buffer);
                    let group = Group {
                        keys: vec![None; taken.len()],
                        messages: taken.into_iter().enumerate().collect(),
                        expected: 0,
                        kind: None,
                        first_seen: Instant::now(),
                        last_seen: Instant::now(),
                    };
                    if let Some(out) = assemble_build(group, self.build, &self.joiner) {
                        dispatch.push(0, out.strip_parts());
                    }
                }
            }
            JoinMode::Auto => {
                let Some(Parts { id, index, count, key, kind, .. }) = msg.parts.clone() else {
                    // No sequence metadata: pass through untouched, same as
                    // a single-message "group of one" (edge
                    // case: "a message with no parts is emitted as-is").
                    dispatch.push(0, msg);
                    return Ok(dispatch);
                };
                let now = Instant::now();
                let group = self.groups.entry(id).or_insert_with(|| Group {
                    messages: Vec::new(),
                    keys: vec![None; count],
                    expected: count,
                    kind: Some(kind),
                    first_seen: now,
                    last_seen: now,
                });
                group.last_seen = now;
                if index < group.keys.len() {
                    group.keys[index] = key;
                }
                group.messages.push((index, msg));

                if group.messages.len() >= group.expected {
                    if let Some(group) = self.groups.remove(&id) {
                        if let Some(out) = assemble_build(group, self.build, &self.joiner) {
                            dispatch.push(0, out.strip_parts());
                        }
                    }
                }
            }
            JoinMode::Reduce => {
                let Some(Parts { id, count, .. }) = msg.parts.clone() else {
                    dispatch.push(0, msg);
                    return Ok(dispatch);
                };
                let now = Instant::now();
                let topic = msg.topic.clone();
                let msg_type = msg.msg_type;
                let entry = self.reduce_groups.entry(id).or_insert_with(|| MergeAcc {
                    value: Value::Null,
                    received: 0,
                    expected: count,
                    topic: topic.clone(),
                    msg_type,
                    last_seen: now,
                });
                entry.last_seen = now;
                let prior = std::mem::replace(&mut entry.value, Value::Null);
                entry.value = mapping_merge(prior, msg.payload);
                entry.received += 1;
                if entry.received >= entry.expected {
                    if let Some(acc) = self.reduce_groups.remove(&id) {
                        dispatch.push(0, acc.into_message());
                    }
                }
            }
            JoinMode::Merge => {
                if let Some(Parts { id, count, .. }) = msg.parts.clone() {
                    let now = Instant::now();
                    let topic = msg.topic.clone();
                    let msg_type = msg.msg_type;
                    let entry = self.merge_groups.entry(id).or_insert_with(|| MergeAcc {
                        value: Value::Object(IndexMap::new()),
                        received: 0,
                        expected: count,
                        topic: topic.clone(),
                        msg_type,
                        last_seen: now,
                    });
                    entry.last_seen = now;
                    let prior = std::mem::replace(&mut entry.value, Value::Null);
                    entry.value = mapping_merge(prior, msg.payload);
                    entry.received += 1;
                    if entry.received >= entry.expected {
                        if let Some(acc) = self.merge_groups.remove(&id) {
                            dispatch.push(0, acc.into_message());
                        }
                    }
                } else {
                    let now = Instant::now();
                    let topic = msg.topic.clone();
                    let msg_type = msg.msg_type;
                    let expected = self.manual_count.max(1);
                    let target = self.merge_anon.get_or_insert_with(|| MergeAcc {
                        value: Value::Object(IndexMap::new()),
                        received: 0,
                        expected,
                        topic: topic.clone(),
                        msg_type,
                        last_seen: now,
                    });
                    target.last_seen = now;
                    let prior = std::mem::replace(&mut target.value, Value::Null);
                    target.value = mapping_merge(prior, msg.payload);
                    target.received += 1;
                    if target.received >= target.expected {
                        if let Some(acc) = self.merge_anon.take() {
                            dispatch.push(0, acc.into_message());
                        }
                    }
                }
            }
        }
        Ok(dispatch)
    }

    fn cleanup(&mut self) -> Result<()> {
        self.groups.clear();
        self.manual_buffer.clear();
        self.reduce_groups.clear();
        self.merge_groups.clear();
        self.merge_anon = None;
        Ok(())
    }
}

pub fn node_info() -> NodeInfo {
    NodeInfo {
        node_type: "join".to_string(),
        name: "Join".to_string(),
        category: Category::Function,
        description: "Reassembles the siblings produced by a split back into one message."
            .to_string(),
        icon: None,
        color: None,
        properties: vec![
            PropertySchema::select(
                "mode",
                vec![
                    Value::from("auto"),
                    Value::from("manual"),
                    Value::from("reduce"),
                    Value::from("merge"),
                ],
            )
            .with_default(Value::from("auto")),
            PropertySchema::select(
                "build",
                vec![
                    Value::from("auto"),
                    Value::from("array"),
                    Value::from("object"),
                    Value::from("string"),
                    Value::from("buffer"),
                ],
            )
            .with_default(Value::from("auto")),
            PropertySchema::string("joiner").with_default(Value::from("\n")),
            PropertySchema::number("timeout_secs"),
            PropertySchema::number("count"),
        ],
        inputs: vec![PortSchema::new("in")],
        outputs: vec![PortSchema::new("out")],
    }
}

#[derive(Debug)]
pub struct JoinFactory;

impl ExecutorFactory for JoinFactory {
    fn create(&self) -> Box<dyn Executor> {
        Box::new(Join::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;

    fn ctx() -> ExecContext {
        ExecContext::new(CancelSource::new().token())
    }

    fn sibling(id: Uuid, index: usize, count: usize, value: i64) -> Message {
        Message::new(Value::Int(value)).with_parts(Parts::new(id, index, count, PartsType::Array))
    }

    #[test]
    fn auto_mode_reassembles_once_every_sibling_arrives() {
        let mut node = Join::new();
        node.init(&Config::new()).unwrap();
        let id = Uuid::new_v4();
        let c = ctx();
        assert!(node.execute(&c, sibling(id, 1, 3, 20)).unwrap().outputs.is_empty());
        assert!(node.execute(&c, sibling(id, 0, 3, 10)).unwrap().outputs.is_empty());
        let dispatch = node.execute(&c, sibling(id, 2, 3, 30)).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
        match &dispatch.outputs[0].1.payload {
            Value::Array(items) => {
                assert_eq!(items, &vec![Value::Int(10), Value::Int(20), Value::Int(30)]);
            }
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn reassembled_message_has_no_parts_metadata() {
        let mut node = Join::new();
        node.init(&Config::new()).unwrap();
        let id = Uuid::new_v4();
        let c = ctx();
        node.execute(&c, sibling(id, 0, 1, 1)).unwrap();
        let dispatch = node.execute(&c, sibling(id, 0, 1, 1)).unwrap();
        // second call starts a fresh group because the first completed
        // group was already removed; verify it still carries no parts.
        if let Some((_, msg)) = dispatch.outputs.first() {
            assert!(msg.parts.is_none());
        }
    }

    #[test]
    fn a_message_with_no_parts_passes_through_untouched() {
        let mut node = Join::new();
        node.init(&Config::new()).unwrap();
        let dispatch = node.execute(&ctx(), Message::new(Value::Int(5))).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
        assert_eq!(dispatch.outputs[0].1.payload, Value::Int(5));
    }

    #[test]
    fn manual_mode_joins_after_the_configured_count() {
        let mut node = Join::new();
        let mut config = Config::new();
        config.insert("mode".to_string(), Value::from("manual"));
        config.insert("count".to_string(), Value::Int(2));
        node.init(&config).unwrap();
        let c = ctx();
        assert!(node
            .execute(&c, Message::new(Value::Int(1)))
            .unwrap()
            .outputs
            .is_empty());
        let dispatch = node.execute(&c, Message::new(Value::Int(2))).unwrap();
        assert_eq!(dispatch.outputs.len(), 1);
    }

    #[test]
    fn object_keyed_siblings_reassemble_into_an_object() {
        let mut node = Join::new();
        node.init(&Config::new()).unwrap();
        let id = Uuid::new_v4();
        let c = ctx();
        let mut a = sibling(id, 0, 2, 1);
        a.parts.as_mut().unwrap().key = Some("x".into());
        let mut b = sibling(id, 1, 2, 2);
        b.parts.as_mut().unwrap().key = Some("y".into());
        node.execute(&c, a).unwrap();
        let dispatch = node.execute(&c, b).unwrap();
        match &dispatch.outputs[0].1.payload {
            Value::Object(map) => {
                assert_eq!(map.get("x"), Some(&Value::Int(1)));
                assert_eq!(map.get("y"), Some(&Value::Int(2)));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn auto_join_round_trips_a_split_string_back_to_the_original() {
        let mut node = Join::new();
        node.init(&Config::new()).unwrap();
        let id = Uuid::new_v4();
        let c = ctx();
        let mk = |index: usize, s: &str| {
            Message::new(Value::from(s)).with_parts(
                Parts::new(id, index, 3, PartsType::String).with_ch("\n"),
            )
        };
        node.execute(&c, mk(0, "a")).unwrap();
        node.execute(&c, mk(1, "b")).unwrap();
        let dispatch = node.execute(&c, mk(2, "c")).unwrap();
        assert_eq!(dispatch.outputs[0].1.payload, Value::from("a\nb\nc"));
    }

    #[test]
    fn auto_join_round_trips_a_split_buffer_back_to_the_original() {
        let mut node = Join::new();
        node.init(&Config::new()).unwrap();
        let id = Uuid::new_v4();
        let c = ctx();
        let mk = |index: usize, b: Vec<u8>| {
            Message::new(Value::Bytes(b)).with_parts(Parts::new(id, index, 2, PartsType::Buffer))
        };
        node.execute(&c, mk(0, vec![1, 2])).unwrap();
        let dispatch = node.execute(&c, mk(1, vec![3, 4])).unwrap();
        assert_eq!(dispatch.outputs[0].1.payload, Value::Bytes(vec![1, 2, 3, 4]));
    }

    #[test]
    fn explicit_string_build_joins_with_a_custom_separator() {
        let mut node = Join::new();
        let mut config = Config::new();
        config.insert("build".to_string(), Value::from("string"));
        config.insert("joiner".to_string(), Value::from(","));
        node.init(&config).unwrap();
        let dispatch = node
            .execute(
                &ctx(),
                Message::new(Value::Array(vec![Value::Int(1), Value::Int(2)])),
            )
            .unwrap();
        // no parts metadata: falls through untouched, same as any
        // unsequenced message, rather than triggering array-building.
        assert_eq!(dispatch.outputs.len(), 1);
        assert!(matches!(dispatch.outputs[0].1.payload, Value::Array(_)));
        drop(node);

        let mut node = Join::new();
        let mut config = Config::new();
        config.insert("mode".to_string(), Value::from("manual"));
        config.insert("count".to_string(), Value::Int(2));
        config.insert("build".to_string(), Value::from("string"));
        config.insert("joiner".to_string(), Value::from(","));
        node.init(&config).unwrap();
        let c = ctx();
        node.execute(&c, Message::new(Value::Int(1))).unwrap();
        let dispatch = node.execute(&c, Message::new(Value::Int(2))).unwrap();
        assert_eq!(dispatch.outputs[0].1.payload, Value::from("1,2"));
    }

    #[test]
    fn reduce_mode_mapping_merges_each_arrival_into_the_accumulator() {
        let mut node = Join::new();
        let mut config = Config::new();
        config.insert("mode".to_string(), Value::from("reduce"));
        node.init(&config).unwrap();
        let id = Uuid::new_v4();
        let c = ctx();
        let mk = |index: usize, k: &str, v: i64| {
            let mut map = IndexMap::new();
            map.insert(k.to_string(), Value::Int(v));
            Message::new(Value::Object(map))
                .with_parts(Parts::new(id, index, 2, PartsType::Object))
        };
        assert!(node.execute(&c, mk(0, "a", 1)).unwrap().outputs.is_empty());
        let dispatch = node.execute(&c, mk(1, "b", 2)).unwrap();
        match &dispatch.outputs[0].1.payload {
            Value::Object(map) => {
                assert_eq!(map.get("a"), Some(&Value::Int(1)));
                assert_eq!(map.get("b"), Some(&Value::Int(2)));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn merge_mode_collects_anonymous_messages_up_to_the_configured_count() {
        let mut node = Join::new();
        let mut config = Config::new();
        config.insert("mode".to_string(), Value::from("merge"));
        config.insert("count".to_string(), Value::Int(2));
        node.init(&config).unwrap();
        let c = ctx();
        let mk = |k: &str, v: i64| {
            let mut map = IndexMap::new();
            map.insert(k.to_string(), Value::Int(v));
            Message::new(Value::Object(map))
        };
        assert!(node.execute(&c, mk("a", 1)).unwrap().outputs.is_empty());
        let dispatch = node.execute(&c, mk("b", 2)).unwrap();
        match &dispatch.outputs[0].1.payload {
            Value::Object(map) => {
                assert_eq!(map.get("a"), Some(&Value::Int(1)));
                assert_eq!(map.get("b"), Some(&Value::Int(2)));
            }
            other => panic!("expected object, got {other:?}"),
        }
    }
}
