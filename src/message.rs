//! The message envelope passed between nodes.

use uuid::Uuid;

use crate::value::Value;

/// `parts.type` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartsType {
    Array,
    Object,
    String,
    Buffer,
}

/// Sequence-part descriptor carried on a [`Message`] produced by `split`
/// and consumed by `join`.
#[derive(Debug, Clone, PartialEq)]
pub struct Parts {
    /// Stable opaque identifier shared by every sibling of one split.
    /// Unique process-wide per split operation (invariant).
    pub id: Uuid,
    /// Zero-based position of this sibling, `< count`.
    pub index: usize,
    /// Total number of siblings in this split, `> 0`.
    pub count: usize,
    pub kind: PartsType,
    /// Present only for `kind == Object`: the key this sibling came from.
    pub key: Option<String>,
    /// Present only for `kind == String`: the delimiter the split used.
    pub ch: Option<String>,
}

impl Parts {
    pub fn new(id: Uuid, index: usize, count: usize, kind: PartsType) -> Self {
        Self {
            id,
            index,
            count,
            kind,
            key: None,
            ch: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_ch(mut self, ch: impl Into<String>) -> Self {
        self.ch = Some(ch.into());
        self
    }

    /// `index < count` and `count > 0`.
    pub fn is_well_formed(&self) -> bool {
        self.count > 0 && self.index < self.count
    }
}

/// `type` tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Data,
    Event,
    Control,
    Error,
}

impl Default for MessageType {
    fn default() -> Self {
        MessageType::Data
    }
}

/// The envelope nodes exchange across an edge.
///
/// Treated as immutable once handed off: a node may freely mutate the
/// instance it was given inside its own `Execute`, but once it returns,
/// every downstream recipient is "as if" handed an independent copy
/// — `Message` implements `Clone` rather than being wrapped in
/// `Arc`, so the engine can give each fan-out successor its own value
/// without the successors being able to observe each other's mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub payload: Value,
    pub topic: Option<String>,
    pub msg_type: MessageType,
    pub parts: Option<Parts>,
}

impl Message {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            topic: None,
            msg_type: MessageType::Data,
            parts: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_type(mut self, msg_type: MessageType) -> Self {
        self.msg_type = msg_type;
        self
    }

    pub fn with_parts(mut self, parts: Parts) -> Self {
        self.parts = Some(parts);
        self
    }

    /// `join` strips split metadata when it emits the rejoined message
    ///: "Split metadata never survives an explicit strip by
    /// a downstream node".
    pub fn strip_parts(mut self) -> Self {
        self.parts = None;
        self
    }

    /// Resolves a property at `path`, recognizing the top-level `topic`
    /// field the way the router's `property` resolution does.
    pub fn resolve_property<'a>(&'a self, path: &str) -> Option<PropertyRef<'a>> {
        if path == "topic" {
            return self.topic.as_deref().map(PropertyRef::Topic);
        }
        self.payload.get_path(path).map(PropertyRef::Value)
    }
}

/// Result of resolving a dotted property path against a message — either
/// the dedicated `topic` field or a value somewhere in the payload tree.
pub enum PropertyRef<'a> {
    Topic(&'a str),
    Value(&'a Value),
}

impl<'a> PropertyRef<'a> {
    pub fn stringify(&self) -> String {
        match self {
            PropertyRef::Topic(s) => s.to_string(),
            PropertyRef::Value(v) => v.stringify(),
        }
    }

    pub fn as_value(&self) -> Value {
        match self {
            PropertyRef::Topic(s) => Value::Str(s.to_string()),
            PropertyRef::Value(v) => (*v).clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_parts_removes_sequence_metadata() {
        let id = Uuid::new_v4();
        let msg = Message::new(Value::Int(1))
            .with_parts(Parts::new(id, 0, 3, PartsType::Array))
            .strip_parts();
        assert!(msg.parts.is_none());
    }

    #[test]
    fn well_formed_parts_invariant() {
        let id = Uuid::new_v4();
        assert!(Parts::new(id, 0, 3, PartsType::Array).is_well_formed());
        assert!(!Parts::new(id, 3, 3, PartsType::Array).is_well_formed());
        assert!(!Parts::new(id, 0, 0, PartsType::Array).is_well_formed());
    }

    #[test]
    fn topic_resolves_ahead_of_payload_lookup() {
        let msg = Message::new(Value::Int(1)).with_topic("sensors/temp");
        match msg.resolve_property("topic") {
            Some(PropertyRef::Topic(t)) => assert_eq!(t, "sensors/temp"),
            _ => panic!("expected topic"),
        }
    }
}
